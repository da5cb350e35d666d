// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Two simulated adapters joined by a serial link.
//!
//! Endpoint 0 is the traffic source. Depending on the mode it sends random
//! frames to endpoint 1, drives the PRBS generator at it, or sends frames
//! that endpoint 1 loops back. At the end a report lists how many frames
//! made it and the status counters of both ends.

use anyhow::Context;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;

use aurora_mac::{Config, Cycle, LinkSimulation, Mode, SimulationCallbacks, Status, Word};

mod modes;

pub use modes::RunMode;

/// Longest frame the traffic source generates.
pub const MAX_FRAME_WORDS: usize = 32;

#[derive(Clone, Debug)]
pub struct RunOptions {
    pub mode: RunMode,
    /// Simulator cycles to run.
    pub cycles: Cycle,
    pub config: Config,
    /// Overrides the configured word corruption rate.
    pub corruption_rate: Option<f64>,
    /// BIST generator rate.
    pub rate: u8,
    pub vcd: Option<PathBuf>,
    /// Seed for the generated frame payloads.
    pub seed: u64,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: RunMode::Frames,
            cycles: 10000,
            config: Config::default(),
            corruption_rate: None,
            rate: 0,
            vcd: None,
            seed: 0x5eed,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Report {
    pub frames_sent: usize,
    /// Frames received that match a sent frame, in order.
    pub frames_delivered: usize,
    /// Sent frames skipped over by a later delivered frame.
    pub frames_lost: usize,
    /// Frames received that match nothing that was sent.
    pub frames_mangled: usize,
    pub status: [Status; 2],
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "frames: {} sent, {} delivered, {} lost, {} mangled",
            self.frames_sent, self.frames_delivered, self.frames_lost, self.frames_mangled
        )?;
        for (idx, status) in self.status.iter().enumerate() {
            writeln!(f, "endpoint {}:", idx)?;
            writeln!(f, "{}", status)?;
        }
        Ok(())
    }
}

/// Random frames, and bookkeeping of which of them came back.
struct Traffic {
    rng: Pcg64,
    max_words: usize,
    next: Option<Vec<Word>>,
    in_flight: VecDeque<Vec<Word>>,
    report: Report,
}

impl Traffic {
    fn new(seed: u64, max_words: usize) -> Self {
        Self {
            rng: Pcg64::seed_from_u64(seed),
            max_words,
            next: None,
            in_flight: VecDeque::new(),
            report: Report::default(),
        }
    }

    fn generate(&mut self) -> Vec<Word> {
        let len = self.rng.gen_range(1..=self.max_words);
        (0..len).map(|_| self.rng.gen()).collect()
    }

    /// Offers the next frame to `sim`'s endpoint 0.
    fn send(&mut self, sim: &LinkSimulation) -> anyhow::Result<()> {
        let endpoint = sim.endpoint(0)?;
        if endpoint.status().clear {
            return Ok(());
        }
        let payload = match self.next.take() {
            Some(payload) => payload,
            None => self.generate(),
        };
        if endpoint.tx().push_frame(&payload) {
            self.report.frames_sent += 1;
            self.in_flight.push_back(payload);
        } else {
            self.next = Some(payload);
        }
        Ok(())
    }

    /// Matches a received frame against the frames still in flight. Frames
    /// skipped over were lost.
    fn receive(&mut self, frame: Vec<Word>) {
        match self.in_flight.iter().position(|sent| *sent == frame) {
            Some(idx) => {
                if idx > 0 {
                    log::debug!("{} frame(s) lost", idx);
                }
                self.in_flight.drain(..=idx);
                self.report.frames_lost += idx;
                self.report.frames_delivered += 1;
            }
            None => {
                log::warn!("received a frame that was never sent: {:x?}", frame);
                self.report.frames_mangled += 1;
            }
        }
    }
}

fn simulate_traffic(
    sim: &mut LinkSimulation,
    options: &RunOptions,
    callbacks: &SimulationCallbacks,
    receiver: usize,
) -> anyhow::Result<Report> {
    let max_words = MAX_FRAME_WORDS
        .min(options.config.mac.frame_buffer_depth)
        .min(options.config.mac.tx_capacity);
    let mut traffic = Traffic::new(options.seed, max_words);
    let mut result = Ok(());
    sim.run_with(options.cycles, callbacks, |sim| {
        if result.is_err() {
            return;
        }
        result = traffic.send(sim).and_then(|_| {
            let rx = sim.endpoint_mut(receiver)?.rx();
            while let Some(frame) = rx.pop_frame() {
                traffic.receive(frame);
            }
            Ok(())
        });
    });
    result?;
    Ok(traffic.report)
}

/// Runs one scenario and reports on it.
pub fn run(options: &RunOptions) -> anyhow::Result<Report> {
    let mut config = options.config.clone();
    if let Some(rate) = options.corruption_rate {
        config.failures.word_corruption_rate = rate;
    }
    let mut sim = LinkSimulation::new(&config).context("building the link simulation")?;
    let callbacks = match &options.vcd {
        Some(path) => SimulationCallbacks::create_vcd_callbacks(path)
            .with_context(|| format!("creating VCD file {}", path.display()))?,
        None => SimulationCallbacks::default(),
    };
    log::info!(
        "running {:?} for {} cycles at sim frequency {}",
        options.mode,
        options.cycles,
        sim.sim_freq()
    );
    let mut report = match options.mode {
        RunMode::Frames => simulate_traffic(&mut sim, options, &callbacks, 1)?,
        RunMode::Loopback => {
            sim.endpoint_mut(1)?.sys_mut().set_mode(Mode::Loopback)?;
            simulate_traffic(&mut sim, options, &callbacks, 0)?
        }
        RunMode::Bist => {
            sim.endpoint_mut(1)?.sys_mut().set_mode(Mode::BistCheck)?;
            let generator = sim.endpoint_mut(0)?.sys_mut();
            generator.set_generator_rate(options.rate)?;
            generator.set_mode(Mode::BistGenerate)?;
            sim.run(options.cycles, &callbacks);
            Report::default()
        }
    };
    report.status = [sim.endpoint(0)?.status(), sim.endpoint(1)?.status()];
    Ok(report)
}

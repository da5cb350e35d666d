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

//! The serial lane between two adapters, and the failures injected into it.

use rand::{Rng, RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::link::LinkInputs;
use crate::{Cycle, Error, Word};

pub const DEFAULT_FAILURE_SEED: u64 = 0x87654321FEDCBA09;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum FaultKind {
    /// The transceivers lose the channel; nothing crosses the lane.
    ChannelDown,
    /// The channel stays up but both ends report a hard error.
    HardError,
}

/// A fault active for physical cycles `start..end`, seen by both ends of the
/// link.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct LinkFault {
    pub start: Cycle,
    pub end: Cycle,
    pub kind: FaultKind,
}

impl LinkFault {
    pub fn active(&self, cycle: Cycle) -> bool {
        (self.start..self.end).contains(&cycle)
    }
}

/// Serializable form of `FailureProperties`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FailureConfiguration {
    pub word_corruption_rate: f64,
    pub soft_error_rate: f64,
    pub seed: u64,
    pub link_faults: Vec<LinkFault>,
}

impl Default for FailureConfiguration {
    fn default() -> Self {
        Self {
            word_corruption_rate: 0.0,
            soft_error_rate: 0.0,
            seed: DEFAULT_FAILURE_SEED,
            link_faults: vec![],
        }
    }
}

fn validate_rate(name: &str, rate: f64) -> Result<(), Error> {
    if (0.0..=1.0).contains(&rate) {
        Ok(())
    } else {
        Err(Error::InvalidConfiguration(format!(
            "{} must be a probability, got {}",
            name, rate
        )))
    }
}

impl FailureConfiguration {
    pub fn validate(&self) -> Result<(), Error> {
        validate_rate("word corruption rate", self.word_corruption_rate)?;
        validate_rate("soft error rate", self.soft_error_rate)?;
        match self.link_faults.iter().find(|fault| fault.end < fault.start) {
            Some(fault) => Err(Error::InvalidConfiguration(format!(
                "link fault ends before it starts: {:?}",
                fault
            ))),
            None => Ok(()),
        }
    }
}

/// Characteristics of the failures we inject into the simulation.
pub struct FailureProperties {
    /// Probability a word has one bit flipped in transit.
    pub word_corruption_rate: f64,

    /// Probability an end reports a soft error on a physical cycle.
    pub soft_error_rate: f64,

    /// Scheduled outages, in physical cycles.
    pub link_faults: Vec<LinkFault>,

    /// Random number generator used to calculate probabilities.
    /// Note: the RNG provided by the Default implementation is deterministic.
    pub rng: Box<dyn RngCore + Send>,
}

impl Default for FailureProperties {
    /// No failures at all, with a deterministic RNG.
    fn default() -> Self {
        Self::from(&FailureConfiguration::default())
    }
}

impl From<&FailureConfiguration> for FailureProperties {
    fn from(config: &FailureConfiguration) -> Self {
        Self {
            word_corruption_rate: config.word_corruption_rate,
            soft_error_rate: config.soft_error_rate,
            link_faults: config.link_faults.clone(),
            rng: Box::new(Xoshiro256StarStar::seed_from_u64(config.seed)),
        }
    }
}

impl std::fmt::Debug for FailureProperties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureProperties")
            .field("word_corruption_rate", &self.word_corruption_rate)
            .field("soft_error_rate", &self.soft_error_rate)
            .field("link_faults", &self.link_faults)
            .finish()
    }
}

impl FailureProperties {
    pub fn validate(&self) -> Result<(), Error> {
        validate_rate("word corruption rate", self.word_corruption_rate)?;
        validate_rate("soft error rate", self.soft_error_rate)
    }

    /// Link status both ends see on `cycle`, before soft errors.
    pub fn link_inputs(&self, cycle: Cycle) -> LinkInputs {
        let mut inputs = LinkInputs::up();
        for fault in self.link_faults.iter().filter(|fault| fault.active(cycle)) {
            match fault.kind {
                FaultKind::ChannelDown => inputs.up = false,
                FaultKind::HardError => inputs.hard_error = true,
            }
        }
        inputs
    }

    pub fn soft_error(&mut self) -> bool {
        self.soft_error_rate > 0.0 && self.rng.gen_bool(self.soft_error_rate)
    }

    /// Possibly flips one bit of `word`.
    pub fn corrupt(&mut self, word: Word) -> Word {
        if self.word_corruption_rate > 0.0 && self.rng.gen_bool(self.word_corruption_rate) {
            let bit = self.rng.gen_range(0..Word::BITS);
            log::info!("channel: flipping bit {} of {:#018x}", bit, word);
            word ^ (1 << bit)
        } else {
            word
        }
    }
}

/// One direction of the serial link: a fixed delay line carrying at most one
/// word per physical cycle.
#[derive(Clone, Debug)]
pub struct Lane {
    in_flight: VecDeque<Option<Word>>,
    words_sent: usize,
}

impl Lane {
    /// A word sent on cycle `t` is received on cycle `t + latency`, provided
    /// every cycle both receives and then sends.
    pub fn new(latency: usize) -> Result<Self, Error> {
        if latency == 0 {
            return Err(Error::InvalidConfiguration(
                "link latency must be at least one cycle".to_string(),
            ));
        }
        Ok(Self {
            in_flight: (0..latency).map(|_| None).collect(),
            words_sent: 0,
        })
    }

    pub fn latency(&self) -> usize {
        self.in_flight.len()
    }

    pub fn receive(&mut self) -> Option<Word> {
        self.in_flight.pop_front().flatten()
    }

    pub fn send(&mut self, word: Option<Word>) {
        if word.is_some() {
            self.words_sent += 1;
        }
        self.in_flight.push_back(word);
    }

    pub fn words_sent(&self) -> usize {
        self.words_sent
    }
}

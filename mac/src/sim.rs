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

//! Cycle based simulation of two adapters joined by a serial link.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::channel::{FailureProperties, Lane};
use crate::config::Config;
use crate::counter::WrapAroundCounter;
use crate::link::LinkInputs;
use crate::mac::{Mac, RxPort, SysDomain, TxPort};
use crate::vcd::{VcdComponent, VcdWriter, DEFAULT_TOP_MODULE};
use crate::{Cycle, Error, Word};

#[derive(Default)]
pub struct SimulationCallbacks {
    vcd_writer: Option<Rc<RefCell<VcdWriter>>>,
}

impl SimulationCallbacks {
    pub fn get_vcd_writer(&self) -> Option<Rc<RefCell<VcdWriter>>> {
        self.vcd_writer.as_ref().map(Rc::clone)
    }

    pub fn create_vcd_callbacks<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self {
            vcd_writer: Some(Rc::new(RefCell::new(VcdWriter::create(path)?))),
        })
    }

    pub fn vcd<F>(&self, f: F)
    where
        F: FnOnce(Rc<RefCell<VcdWriter>>),
    {
        if let Some(writer) = self.get_vcd_writer() {
            f(writer)
        }
    }
}

/// Two adapters, 0 and 1, each sending on its own lane to the other.
///
/// The physical and system domains of both adapters tick at their
/// configured frequencies. The simulator runs at the least common multiple
/// of the two, e.g. with phy = 3 and sys = 2 the simulator frequency is 6;
/// every simulator cycle the physical domains tick if their counter
/// (limit 6 / 3 = 2) is at zero, and likewise the system domains (limit 3).
pub struct LinkSimulation {
    endpoints: [Mac; 2],
    /// `lanes[i]` carries what endpoint `i` transmits.
    lanes: [Lane; 2],
    failures: FailureProperties,
    sim_freq: usize,
    phy_counter: WrapAroundCounter,
    sys_counter: WrapAroundCounter,
    sim_cycles: Cycle,
    phy_cycles: Cycle,
    sys_cycles: Cycle,
}

impl LinkSimulation {
    /// Builds the simulation with failures taken from the configuration.
    pub fn new(config: &Config) -> Result<Self, Error> {
        Self::with_failures(config, FailureProperties::from(&config.failures))
    }

    pub fn with_failures(config: &Config, failures: FailureProperties) -> Result<Self, Error> {
        config.validate()?;
        failures.validate()?;
        let link = &config.link;
        let sim_freq = num::integer::lcm(link.phy_frequency, link.sys_frequency);
        log::debug!(
            "link simulation: phy {} sys {} -> sim frequency {}",
            link.phy_frequency,
            link.sys_frequency,
            sim_freq
        );
        Ok(Self {
            endpoints: [Mac::new(&config.mac)?, Mac::new(&config.mac)?],
            lanes: [Lane::new(link.latency)?, Lane::new(link.latency)?],
            failures,
            sim_freq,
            phy_counter: WrapAroundCounter::new(sim_freq / link.phy_frequency),
            sys_counter: WrapAroundCounter::new(sim_freq / link.sys_frequency),
            sim_cycles: 0,
            phy_cycles: 0,
            sys_cycles: 0,
        })
    }

    pub fn endpoint(&self, idx: usize) -> Result<&Mac, Error> {
        self.endpoints.get(idx).ok_or(Error::InvalidEndpoint(idx))
    }

    pub fn endpoint_mut(&mut self, idx: usize) -> Result<&mut Mac, Error> {
        self.endpoints
            .get_mut(idx)
            .ok_or(Error::InvalidEndpoint(idx))
    }

    pub fn sim_freq(&self) -> usize {
        self.sim_freq
    }

    pub fn sim_cycles(&self) -> Cycle {
        self.sim_cycles
    }

    pub fn phy_cycles(&self) -> Cycle {
        self.phy_cycles
    }

    pub fn sys_cycles(&self) -> Cycle {
        self.sys_cycles
    }

    /// Words put on `lane` so far (after failures dropped some).
    pub fn words_sent(&self, lane: usize) -> Result<usize, Error> {
        self.lanes
            .get(lane)
            .map(Lane::words_sent)
            .ok_or(Error::InvalidEndpoint(lane))
    }

    fn simulate_phy_cycle(&mut self) {
        let faults = self.failures.link_inputs(self.phy_cycles);
        let received = [self.lanes[1].receive(), self.lanes[0].receive()];
        for (idx, rx) in received.into_iter().enumerate() {
            let inputs = LinkInputs {
                soft_error: self.failures.soft_error(),
                ..faults
            };
            let tx = self.endpoints[idx].phy_mut().step(inputs, rx, true);
            let tx = if faults.up {
                tx.map(|word| self.failures.corrupt(word))
            } else {
                None
            };
            self.lanes[idx].send(tx);
        }
        self.phy_cycles += 1;
    }

    /// Steps the simulator by one cycle at the simulator frequency.
    pub fn simulate_one_cycle(&mut self, callbacks: &SimulationCallbacks) {
        log::trace!(
            "simulate_one_cycle, sim cycle: {}, phy cycle: {}, sys cycle: {}",
            self.sim_cycles,
            self.phy_cycles,
            self.sys_cycles
        );
        callbacks.vcd(|writer| writer.borrow_mut().enter_cycle());
        if self.phy_counter.test() {
            self.simulate_phy_cycle();
        }
        if self.sys_counter.test() {
            for endpoint in self.endpoints.iter_mut() {
                endpoint.sys_mut().step();
            }
            self.sys_cycles += 1;
        }
        self.phy_counter.advance();
        self.sys_counter.advance();
        self.sim_cycles += 1;
        callbacks.vcd(|writer| {
            self.vcd_trace(Rc::clone(&writer));
            writer.borrow_mut().end_cycle();
        });
    }

    /// Runs `cycles` simulator cycles, writing the VCD header first when
    /// tracing.
    pub fn run(&mut self, cycles: Cycle, callbacks: &SimulationCallbacks) {
        self.run_with(cycles, callbacks, |_| {});
    }

    /// Like `run`, calling `before_cycle` ahead of every simulator cycle to
    /// drive the user facing ports.
    pub fn run_with<F>(
        &mut self,
        cycles: Cycle,
        callbacks: &SimulationCallbacks,
        mut before_cycle: F,
    ) where
        F: FnMut(&mut Self),
    {
        if self.sim_cycles == 0 {
            callbacks.vcd(|writer| VcdWriter::write_header(writer, &*self));
        }
        for _ in 0..cycles {
            before_cycle(self);
            self.simulate_one_cycle(callbacks);
        }
        callbacks.vcd(|writer| writer.borrow_mut().flush_after_simulation());
    }

    /// Runs until both adapters see a healthy link, for at most
    /// `max_cycles` simulator cycles. Returns whether they came up.
    pub fn bring_up(&mut self, max_cycles: Cycle, callbacks: &SimulationCallbacks) -> bool {
        for _ in 0..max_cycles {
            if self.endpoints.iter().all(|endpoint| !endpoint.status().clear) {
                return true;
            }
            self.simulate_one_cycle(callbacks);
        }
        self.endpoints.iter().all(|endpoint| !endpoint.status().clear)
    }

    fn trace_endpoints(&self, writer: Rc<RefCell<VcdWriter>>) {
        for (idx, endpoint) in self.endpoints.iter().enumerate() {
            let _scope =
                VcdWriter::managed_trace_scope(Rc::clone(&writer), &format!("endpoint{}", idx));
            endpoint.vcd_trace(Rc::clone(&writer));
        }
    }
}

impl VcdComponent for LinkSimulation {
    fn vcd_write_scope(&self, writer: Rc<RefCell<VcdWriter>>) {
        let _scope = VcdWriter::managed_decl_scope(Rc::clone(&writer), DEFAULT_TOP_MODULE);
        writer.borrow_mut().add_integer_var::<u64>("sim_cycles");
        for (idx, endpoint) in self.endpoints.iter().enumerate() {
            let _scope =
                VcdWriter::managed_decl_scope(Rc::clone(&writer), &format!("endpoint{}", idx));
            endpoint.vcd_write_scope(Rc::clone(&writer));
        }
    }

    fn vcd_init(&self, writer: Rc<RefCell<VcdWriter>>) {
        let _scope = VcdWriter::managed_trace_scope(Rc::clone(&writer), DEFAULT_TOP_MODULE);
        writer
            .borrow_mut()
            .change_vector_immediately("sim_cycles", 0);
        for (idx, endpoint) in self.endpoints.iter().enumerate() {
            let _scope =
                VcdWriter::managed_trace_scope(Rc::clone(&writer), &format!("endpoint{}", idx));
            endpoint.vcd_init(Rc::clone(&writer));
        }
    }

    fn vcd_trace(&self, writer: Rc<RefCell<VcdWriter>>) {
        let _scope = VcdWriter::managed_trace_scope(Rc::clone(&writer), DEFAULT_TOP_MODULE);
        writer
            .borrow_mut()
            .change_vector("sim_cycles", self.sim_cycles as u64);
        self.trace_endpoints(writer);
    }
}

/// Runs one adapter with its physical and system domains on two threads,
/// its TX lane looped back into its RX through a cable of `latency` words.
///
/// The system domain runs on the calling thread. `on_sys_cycle` is called
/// after every system cycle with the cycle number and the user facing
/// ports; the run ends when it returns false. Returns the number of system
/// cycles run.
pub fn run_threaded<F>(mac: &mut Mac, latency: usize, mut on_sys_cycle: F) -> Cycle
where
    F: FnMut(Cycle, &mut SysDomain, &mut RxPort, &TxPort) -> bool,
{
    let done = AtomicBool::new(false);
    let (phy, sys, rx, tx) = mac.parts_mut();
    std::thread::scope(|scope| {
        scope.spawn(|| {
            let mut cable: VecDeque<Option<Word>> = (0..latency).map(|_| None).collect();
            let mut phy_cycles: Cycle = 0;
            while !done.load(Ordering::Acquire) {
                let rx = cable.pop_front().flatten();
                cable.push_back(phy.step(LinkInputs::up(), rx, true));
                phy_cycles += 1;
                std::thread::yield_now();
            }
            log::debug!("run_threaded: {} phy cycles", phy_cycles);
        });
        let mut cycle: Cycle = 0;
        loop {
            sys.step();
            cycle += 1;
            if !on_sys_cycle(cycle, sys, rx, tx) {
                break;
            }
        }
        done.store(true, Ordering::Release);
        cycle
    })
}

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

//! Link health tracking and the `clear` signal.
//!
//! The supervisor lives in the physical domain, next to the transceiver
//! status pins. Each physical cycle it samples the link, updates its
//! counters and publishes a `LinkSnapshot`; the system domain follows the
//! newest snapshot through a `ClearSync`.
//!
//! A `clear` pulse is never lost on the way: the supervisor keeps
//! publishing `clear` until a snapshot carrying it has entered the transfer
//! queue, and `ClearSync` reports `clear` for a system cycle if any snapshot
//! taken in during that cycle had it set.

use crate::queue::{QueueConsumer, QueueProducer};

/// Link status inputs, sampled once per physical cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkInputs {
    pub up: bool,
    pub hard_error: bool,
    pub soft_error: bool,
}

impl LinkInputs {
    /// A healthy, error free link.
    pub fn up() -> Self {
        Self {
            up: true,
            ..Default::default()
        }
    }

    pub fn down() -> Self {
        Self::default()
    }

    /// The data path is held idle while the channel is down or has a hard
    /// error.
    pub fn clear(&self) -> bool {
        !self.up || self.hard_error
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    Up,
    Down,
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "Up"),
            Self::Down => write!(f, "Down"),
        }
    }
}

/// Physical domain counters, published together with `clear`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub clear: bool,
    pub overruns: u32,
    pub soft_errors: u32,
}

impl Default for LinkSnapshot {
    /// What the system domain assumes before it has heard anything: the
    /// path is cleared.
    fn default() -> Self {
        Self {
            clear: true,
            overruns: 0,
            soft_errors: 0,
        }
    }
}

#[derive(Debug)]
pub struct LinkSupervisor {
    status: LinkStatus,
    clear: bool,
    overruns: u32,
    soft_errors: u32,
    /// A cleared cycle the system domain has not been told about yet.
    unpublished_clear: bool,
    publisher: QueueProducer<LinkSnapshot>,
}

impl LinkSupervisor {
    pub fn new(publisher: QueueProducer<LinkSnapshot>) -> Self {
        Self {
            status: LinkStatus::Down,
            clear: true,
            overruns: 0,
            soft_errors: 0,
            unpublished_clear: true,
            publisher,
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    pub fn clear(&self) -> bool {
        self.clear
    }

    /// Samples the link for this cycle and returns `clear`.
    pub fn sample(&mut self, inputs: LinkInputs) -> bool {
        let status = if inputs.clear() {
            LinkStatus::Down
        } else {
            LinkStatus::Up
        };
        if status != self.status {
            log::info!(
                "link: {} -> {} (up: {}, hard error: {})",
                self.status,
                status,
                inputs.up,
                inputs.hard_error
            );
            self.status = status;
        }
        self.clear = inputs.clear();
        if self.clear {
            self.unpublished_clear = true;
            self.overruns = 0;
            self.soft_errors = 0;
        } else if inputs.soft_error {
            log::debug!("link: soft error");
            self.soft_errors = self.soft_errors.wrapping_add(1);
        }
        self.clear
    }

    /// Counts one word lost at the physical ingress.
    pub fn record_overrun(&mut self) {
        if !self.clear {
            self.overruns = self.overruns.wrapping_add(1);
        }
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            clear: self.clear,
            overruns: self.overruns,
            soft_errors: self.soft_errors,
        }
    }

    /// Hands the current snapshot to the system domain. A full transfer
    /// queue skips this cycle's snapshot; the next one carries the same
    /// cumulative counts, and `clear` if this one had it.
    pub fn publish(&mut self) {
        let mut snapshot = self.snapshot();
        snapshot.clear |= self.unpublished_clear;
        if self.publisher.push(snapshot).is_ok() {
            self.unpublished_clear = false;
        } else {
            log::trace!("link: status transfer busy");
        }
    }
}

/// The system domain's view of the link.
#[derive(Debug)]
pub struct ClearSync {
    latest: LinkSnapshot,
    /// `clear` as seen by the last `update`.
    clear: bool,
    receiver: QueueConsumer<LinkSnapshot>,
}

impl ClearSync {
    pub fn new(receiver: QueueConsumer<LinkSnapshot>) -> Self {
        Self {
            latest: LinkSnapshot::default(),
            clear: true,
            receiver,
        }
    }

    /// Takes in every snapshot published since the last call and returns
    /// the synchronized `clear`: set if any of them, or the last one seen
    /// before, had `clear` set.
    pub fn update(&mut self) -> bool {
        let mut pulsed = false;
        while let Some(snapshot) = self.receiver.pop() {
            if snapshot.clear != self.latest.clear {
                log::debug!("link: synchronized clear -> {}", snapshot.clear);
            }
            pulsed |= snapshot.clear;
            self.latest = snapshot;
        }
        self.clear = pulsed || self.latest.clear;
        self.clear
    }

    pub fn clear(&self) -> bool {
        self.clear
    }

    /// Whether the newest snapshot still has `clear` set. False after an
    /// `update` that only caught a pulse.
    pub fn asserted(&self) -> bool {
        self.latest.clear
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        self.latest
    }
}

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

//! Functional model of an Aurora 64b/66b style link adapter: flow queues
//! between a physical and a system clock domain, a framing codec with CRC
//! protection, a store-and-forward packet gate, link supervision, and a
//! PRBS built-in self-test.

pub mod bist;
pub mod channel;
mod checksum;
pub mod codec;
mod config;
mod counter;
mod error;
mod gate;
mod link;
mod mac;
mod queue;
mod sim;
mod vcd;

// Public types
// a word on the serial link
pub type Word = u64;
// type to use for cycles
pub type Cycle = usize;

pub use crate::channel::{FailureConfiguration, FailureProperties, FaultKind, LinkFault};
pub use crate::checksum::{crc64_words, Crc64};
pub use crate::config::{Config, LinkConfiguration, MacConfiguration};
pub use crate::counter::{Counter48, WrapAroundCounter};
pub use crate::error::Error;
pub use crate::gate::PacketGate;
pub use crate::link::{ClearSync, LinkInputs, LinkSnapshot, LinkStatus, LinkSupervisor};
pub use crate::mac::{Mac, Mode, PhyDomain, RxPort, Status, StreamWord, SysDomain, TxPort};
pub use crate::queue::{flow_queue, QueueConsumer, QueueProducer};
pub use crate::sim::{run_threaded, LinkSimulation, SimulationCallbacks};
pub use crate::vcd::{VcdComponent, VcdWriter};

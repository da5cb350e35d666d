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

use crate::frame_corruption::simulate_frame_corruption;
use crate::link_outage::{in_order, simulate_clear_pulses, simulate_link_outage};
use aurora_mac::FaultKind;

mod frame_corruption;
mod link_outage;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let (counters, status) = simulate_frame_corruption(0.05, true)?;
    log::info!("Counters: {:?}", counters);
    log::info!("One: {} Two: {}", status[0], status[1]);

    for kind in [FaultKind::ChannelDown, FaultKind::HardError] {
        let outcome = simulate_link_outage(kind)?;
        log::info!(
            "{:?}: sent {} received {} torn {} in order {}",
            kind,
            outcome.sent,
            outcome.received.len(),
            outcome.torn,
            in_order(&outcome.received)
        );
    }
    let outcome = simulate_clear_pulses()?;
    log::info!(
        "Pulses: sent {} received {} torn {}",
        outcome.sent,
        outcome.received.len(),
        outcome.torn
    );
    Ok(())
}

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

//! Test that link outages clear the data path: nothing partial or stale is
//! delivered, counters restart from zero, and traffic resumes afterwards.

use itertools::Itertools;

use aurora_mac::{
    Config, Cycle, FailureProperties, FaultKind, LinkConfiguration, LinkFault, LinkSimulation,
    SimulationCallbacks, Status, Word,
};

const CYCLES: Cycle = 1500;
pub const OUTAGE_START: Cycle = 500;
pub const OUTAGE_END: Cycle = 700;
// time for the link status to reach the system domain
const RECOVERY_CYCLES: Cycle = 10;
// one-cycle hard errors, every PULSE_PERIOD physical cycles
const PULSE_PERIOD: Cycle = 37;

#[derive(Debug)]
pub struct Outcome {
    pub sent: usize,
    /// Sequence numbers of the frames endpoint 1 received.
    pub received: Vec<Word>,
    /// Frames that are not exactly one of the frames sent.
    pub torn: usize,
    /// First sequence number sent once the link had recovered.
    pub first_after_outage: Word,
    pub status_during: [Status; 2],
    pub status_after: [Status; 2],
}

fn sequence_frame(seq: Word) -> Vec<Word> {
    // variable lengths so that the outage cuts frames at every offset
    (0..(seq % 9 + 1)).map(|_| seq).collect()
}

fn is_sent_frame(frame: &[Word]) -> bool {
    frame.iter().all_equal() && sequence_frame(frame[0]) == frame
}

/// Sends numbered frames from endpoint 0 to endpoint 1 for `CYCLES`
/// simulator cycles. Status is sampled at `during` and at the end;
/// `recovered` marks the sequence number that counts as sent after the
/// fault.
fn simulate_sequence(
    config: &Config,
    failures: FailureProperties,
    during: Cycle,
    recovered: Cycle,
) -> anyhow::Result<Outcome> {
    let mut sim = LinkSimulation::with_failures(config, failures)?;
    let callbacks = SimulationCallbacks::default();
    let mut seq: Word = 0;
    let mut received = vec![];
    let mut torn = 0;
    let mut status_during = None;
    let mut first_after_outage = None;
    // returns the next sequence number to send
    let mut step = |sim: &mut LinkSimulation| -> anyhow::Result<Word> {
        let sender = sim.endpoint(0)?;
        if !sender.status().clear && sender.tx().push_frame(&sequence_frame(seq)) {
            seq += 1;
        }
        while let Some(frame) = sim.endpoint_mut(1)?.rx().pop_frame() {
            if is_sent_frame(&frame) {
                received.push(frame[0]);
            } else {
                log::warn!("torn frame {:?}", frame);
                torn += 1;
            }
        }
        Ok(seq)
    };
    for cycle in 0..CYCLES {
        let next = step(&mut sim)?;
        if cycle == recovered {
            first_after_outage = Some(next);
        }
        sim.simulate_one_cycle(&callbacks);
        if cycle == during {
            status_during = Some([sim.endpoint(0)?.status(), sim.endpoint(1)?.status()]);
        }
    }
    drop(step);
    Ok(Outcome {
        sent: seq as usize,
        received,
        torn,
        first_after_outage: first_after_outage.unwrap_or(Word::MAX),
        status_during: status_during.unwrap_or_default(),
        status_after: [sim.endpoint(0)?.status(), sim.endpoint(1)?.status()],
    })
}

/// Sends numbered frames across an outage of the given kind. Also lets
/// endpoint 1 report a soft error now and then, so there is something for
/// the outage to reset.
pub fn simulate_link_outage(kind: FaultKind) -> anyhow::Result<Outcome> {
    let failures = FailureProperties {
        soft_error_rate: 0.01,
        link_faults: vec![LinkFault {
            start: OUTAGE_START,
            end: OUTAGE_END,
            kind,
        }],
        ..Default::default()
    };
    simulate_sequence(
        &Config::default(),
        failures,
        (OUTAGE_START + OUTAGE_END) / 2,
        OUTAGE_END + RECOVERY_CYCLES,
    )
}

/// Sends numbered frames while the physical domain, running three times as
/// fast as the system domain, sees single-cycle hard errors. Each pulse
/// ends before the system domain's next cycle.
pub fn simulate_clear_pulses() -> anyhow::Result<Outcome> {
    let config = Config {
        link: LinkConfiguration {
            phy_frequency: 3,
            sys_frequency: 1,
            ..Default::default()
        },
        ..Default::default()
    };
    let failures = FailureProperties {
        link_faults: (OUTAGE_START..OUTAGE_END)
            .step_by(PULSE_PERIOD)
            .map(|start| LinkFault {
                start,
                end: start + 1,
                kind: FaultKind::HardError,
            })
            .collect(),
        ..Default::default()
    };
    simulate_sequence(&config, failures, OUTAGE_START, OUTAGE_END + RECOVERY_CYCLES)
}

/// Whether `received` is a strictly increasing run of sequence numbers.
pub fn in_order(received: &[Word]) -> bool {
    received.iter().tuple_windows().all(|(a, b)| a < b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_outage(kind: FaultKind) {
        let _ = env_logger::try_init();
        let outcome = simulate_link_outage(kind).unwrap();
        log::info!(
            "{:?}: sent {} received {}",
            kind,
            outcome.sent,
            outcome.received.len()
        );
        assert_eq!(outcome.torn, 0);
        assert!(in_order(&outcome.received));
        assert!(outcome.received.len() < outcome.sent);

        for status in &outcome.status_during {
            assert!(status.clear);
            assert_eq!(status.soft_errors, 0);
            assert_eq!(status.overruns, 0);
            assert_eq!(status.checksum_errors, 0);
            assert_eq!(status.gate_occupancy, 0);
        }
        for status in &outcome.status_after {
            assert!(!status.clear);
        }
        // soft errors are counted again once the link is back
        assert!(outcome.status_after[1].soft_errors > 0);

        // traffic resumed
        assert!(outcome
            .received
            .iter()
            .any(|seq| *seq >= outcome.first_after_outage));
    }

    #[test]
    fn test_channel_down() {
        check_outage(FaultKind::ChannelDown);
    }

    #[test]
    fn test_hard_error() {
        check_outage(FaultKind::HardError);
    }

    #[test]
    fn test_clear_pulses_faster_than_system_domain() {
        let _ = env_logger::try_init();
        let outcome = simulate_clear_pulses().unwrap();
        log::info!(
            "pulses: sent {} received {}",
            outcome.sent,
            outcome.received.len()
        );
        assert_eq!(outcome.torn, 0);
        assert!(in_order(&outcome.received));
        // frames in flight at each pulse are lost
        assert!(outcome.received.len() < outcome.sent);
        assert!(outcome
            .received
            .iter()
            .any(|seq| *seq >= outcome.first_after_outage));
        for status in &outcome.status_after {
            assert!(!status.clear);
        }
    }
}

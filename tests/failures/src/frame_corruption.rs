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

//! Test that a word corruption rate on the lane turns into dropped frames
//! and checksum errors, never into corrupt frames delivered to the consumer.

use aurora_mac::{Config, LinkSimulation, MacConfiguration, SimulationCallbacks, Status, Word};

const PATTERN: Word = 0xDEAD_BEEF_DEAD_BEEF;
const FRAME_WORDS: usize = 4;
const CYCLES: usize = 2000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counter {
    pub corrupt: u32,
    pub correct: u32,
}

// Both endpoints send a pattern frame to each other as fast as they can and
// count what they receive. Returns the counts and the status of both ends.
pub fn simulate_frame_corruption(
    word_corruption_rate: f64,
    checksum: bool,
) -> anyhow::Result<([Counter; 2], [Status; 2])> {
    let mut config = Config {
        mac: MacConfiguration {
            checksum,
            ..Default::default()
        },
        ..Default::default()
    };
    config.failures.word_corruption_rate = word_corruption_rate;
    let mut sim = LinkSimulation::new(&config)?;
    let pattern = [PATTERN; FRAME_WORDS];
    let mut counters = [Counter::default(); 2];
    let mut result = Ok(());
    sim.run_with(CYCLES, &SimulationCallbacks::default(), |sim| {
        for (idx, counter) in counters.iter_mut().enumerate() {
            let endpoint = match sim.endpoint_mut(idx) {
                Ok(endpoint) => endpoint,
                Err(err) => {
                    result = Err(err);
                    return;
                }
            };
            if !endpoint.status().clear {
                endpoint.tx().push_frame(&pattern);
            }
            while let Some(frame) = endpoint.rx().pop_frame() {
                if frame == pattern {
                    log::trace!("Recv correct");
                    counter.correct += 1;
                } else {
                    log::info!("Recv corrupt {:x?}", frame);
                    counter.corrupt += 1;
                }
            }
        }
    });
    result?;
    Ok((counters, [sim.endpoint(0)?.status(), sim.endpoint(1)?.status()]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_corruption() {
        let _ = env_logger::try_init();
        let (counters, status) = simulate_frame_corruption(0.0, true).unwrap();
        log::info!("No corruption: {:?}", counters);
        for idx in 0..2 {
            assert_eq!(counters[idx].corrupt, 0);
            // a frame takes six words on the wire
            assert!(counters[idx].correct > 250);
            assert_eq!(status[idx].checksum_errors, 0);
            assert_eq!(status[idx].framing_errors, 0);
        }
    }

    #[test]
    fn test_corruption_is_caught_by_checksum() {
        let _ = env_logger::try_init();
        let (clean, _) = simulate_frame_corruption(0.0, true).unwrap();
        let (counters, status) = simulate_frame_corruption(0.05, true).unwrap();
        log::info!("Some corruption: {:?}", counters);
        for idx in 0..2 {
            assert_eq!(counters[idx].corrupt, 0);
            assert!(counters[idx].correct > 0);
            assert!(counters[idx].correct < clean[idx].correct);
            assert!(status[idx].checksum_errors + status[idx].framing_errors > 0);
        }
    }

    #[test]
    fn test_corruption_without_checksum_gets_through() {
        let _ = env_logger::try_init();
        let (counters, _) = simulate_frame_corruption(0.05, false).unwrap();
        log::info!("Unchecked corruption: {:?}", counters);
        assert!(counters.iter().any(|counter| counter.corrupt > 0));
    }
}

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

//! Built-in self-test: a PRBS pattern generator and a self-synchronizing
//! checker.
//!
//! Both sides run the same 16-bit recurrence (shift left by one, feed back
//! bit 15 xor bit 14) from the seed `0xFFFF`. Each 16-bit state is spread
//! over a word as `{!g, g, !g, g}`, most significant quarter first.

use crate::counter::{Counter48, WrapAroundCounter};
use crate::{Error, Word};

pub const PRBS_SEED: u16 = 0xFFFF;

/// Generator rates are a 5-bit field.
pub const MAX_GENERATOR_RATE: u8 = 31;

pub fn prbs15_next(state: u16) -> u16 {
    let feedback = ((state >> 15) ^ (state >> 14)) & 1;
    (state << 1) | feedback
}

/// Spreads a generator state over a full word.
pub fn pattern_word(state: u16) -> Word {
    let g = state as Word;
    let inverted = !g & 0xFFFF;
    (inverted << 48) | (g << 32) | (inverted << 16) | g
}

/// Emits one pattern word per ready cycle, except that with rate `N > 0`
/// the last of every `N + 1` ready cycles is left idle.
#[derive(Clone, Debug)]
pub struct BistGenerator {
    state: u16,
    rate: u8,
    throttle: WrapAroundCounter,
}

impl BistGenerator {
    pub fn new() -> Self {
        Self {
            state: PRBS_SEED,
            rate: 0,
            throttle: WrapAroundCounter::new(1),
        }
    }

    pub fn rate(&self) -> u8 {
        self.rate
    }

    pub fn set_rate(&mut self, rate: u8) -> Result<(), Error> {
        if rate > MAX_GENERATOR_RATE {
            return Err(Error::InvalidRate(rate));
        }
        self.rate = rate;
        self.throttle = WrapAroundCounter::new(rate as usize + 1);
        Ok(())
    }

    /// Produces the word for this cycle, if any. Cycles where the consumer
    /// is not ready neither advance the sequence nor the throttle.
    pub fn next(&mut self, ready: bool) -> Option<Word> {
        if !ready {
            return None;
        }
        let idle = self.rate > 0 && self.throttle.at_limit();
        self.throttle.advance();
        if idle {
            return None;
        }
        let word = pattern_word(self.state);
        self.state = prbs15_next(self.state);
        Some(word)
    }

    /// Restarts the sequence from the seed.
    pub fn reset(&mut self) {
        self.state = PRBS_SEED;
        self.throttle.reset();
    }
}

impl Default for BistGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Follows a generator's sequence on received words.
///
/// The checker hunts for the seed pattern; once it has seen it, it is locked
/// and compares every further word against the next state of its own copy
/// of the recurrence. It only unlocks on `reset`.
#[derive(Clone, Debug, Default)]
pub struct BistChecker {
    state: u16,
    locked: bool,
    samples: Counter48,
    errors: Counter48,
}

impl BistChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    pub fn samples(&self) -> u64 {
        self.samples.value()
    }

    pub fn errors(&self) -> u64 {
        self.errors.value()
    }

    pub fn check(&mut self, word: Word) {
        if !self.locked {
            if word == pattern_word(PRBS_SEED) {
                log::info!("bist: checker locked");
                self.locked = true;
                self.state = PRBS_SEED;
                self.samples.reset();
                self.errors.reset();
            }
            return;
        }
        self.state = prbs15_next(self.state);
        let expected = pattern_word(self.state);
        self.samples.increment();
        if word != expected {
            log::debug!(
                "bist: mismatch, expected {:#018x} got {:#018x}",
                expected,
                word
            );
            self.errors.increment();
        }
    }

    pub fn reset(&mut self) {
        if self.locked {
            log::info!("bist: checker unlocked");
        }
        *self = Self::default();
    }
}

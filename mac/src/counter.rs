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

// Counter that wraps around on limit value. E.g., if limit = 3, then the count
// sequence is 0, 1, 2, 0, 1, 2, ...
#[derive(Clone, Debug)]
pub struct WrapAroundCounter {
    value: usize,
    limit: usize,
}

impl WrapAroundCounter {
    pub fn new(limit: usize) -> Self {
        assert!(limit > 0);
        Self { value: 0, limit }
    }

    pub fn advance(&mut self) {
        self.value = if self.value + 1 == self.limit {
            0
        } else {
            self.value + 1
        };
    }

    /// True at the start of every period.
    pub fn test(&self) -> bool {
        self.value == 0
    }

    /// True on the final count of every period.
    pub fn at_limit(&self) -> bool {
        self.value + 1 == self.limit
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn reset(&mut self) {
        self.value = 0;
    }
}

/// Width of the BIST sample and error counters.
pub const COUNTER_48_BITS: u32 = 48;
const COUNTER_48_MASK: u64 = (1 << COUNTER_48_BITS) - 1;

/// A 48-bit counter that wraps modulo 2^48.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counter48(u64);

impl Counter48 {
    pub fn increment(&mut self) {
        self.0 = (self.0 + 1) & COUNTER_48_MASK;
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn reset(&mut self) {
        self.0 = 0;
    }
}

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

//! Running frame checksum.
//!
//! CRC-64/WE: the ECMA-182 polynomial, processed MSB-first over the
//! big-endian bytes of each word, with an all-ones initial value and final
//! XOR. A degree-64 CRC catches every error burst of up to 64 bits, so
//! corrupting any single word of a frame (payload or trailer) is always
//! detected. The non-zero initial value and final XOR mean that a frame
//! followed by its own trailer leaves a non-initial register, so two frames
//! merged by a lost terminator still fail the check.

use crate::Word;

/// ECMA-182 generator polynomial.
const CRC64_POLY: u64 = 0x42F0_E1EB_A9EA_3693;

/// Register value at the start of every frame.
const CRC64_INIT: u64 = !0;

/// Applied to the register to produce the trailer.
const CRC64_XOR_OUT: u64 = !0;

/// Precomputed CRC-64 lookup table (256 entries).
const CRC64_TABLE: [u64; 256] = {
    let mut table = [0u64; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u64) << 56;
        let mut j = 0;
        while j < 8 {
            if crc & 0x8000_0000_0000_0000 != 0 {
                crc = (crc << 1) ^ CRC64_POLY;
            } else {
                crc <<= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Accumulates the checksum of one frame, word by word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Crc64 {
    crc: u64,
}

impl Default for Crc64 {
    fn default() -> Self {
        Self { crc: CRC64_INIT }
    }
}

impl Crc64 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, word: Word) {
        for byte in word.to_be_bytes() {
            let idx = ((self.crc >> 56) ^ byte as u64) as usize;
            self.crc = (self.crc << 8) ^ CRC64_TABLE[idx];
        }
    }

    /// The trailer for the words seen so far.
    pub fn value(&self) -> u64 {
        self.crc ^ CRC64_XOR_OUT
    }

    pub fn reset(&mut self) {
        self.crc = CRC64_INIT;
    }
}

/// Checksum of a whole payload.
pub fn crc64_words(words: &[Word]) -> u64 {
    let mut crc = Crc64::new();
    words.iter().for_each(|word| crc.update(*word));
    crc.value()
}

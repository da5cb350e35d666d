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

//! Frame codec: turns a `(word, last)` stream into delimited frames on the
//! wire, and back.
//!
//! Wire format:
//!
//!```text
//!   stuffed(p0) .. stuffed(pN) [stuffed(crc)] ESCAPE_TERMINATOR
//!```
//!
//! A control word carries `CONTROL_MARK` in bits 63..16 and a code in bits
//! 15..0. Payload words that happen to carry `CONTROL_MARK` are sent as
//! `ESCAPE_PREFIX, word ^ STUFF_MASK`; the stuffed literal never looks like
//! a control word.

use itertools::{Itertools, Position};
use std::collections::VecDeque;

use crate::checksum::Crc64;
use crate::Word;

/// Bits 63..16 of every control word.
pub const CONTROL_MARK: u64 = 0xFB5C_A7E1_D00D;
const CONTROL_SHIFT: u32 = 16;
const CONTROL_CODE_MASK: u64 = 0xFFFF;

const CODE_TERMINATOR: u64 = 0x00FD;
const CODE_ESCAPE: u64 = 0x00E5;

/// Ends a frame.
pub const ESCAPE_TERMINATOR: Word = (CONTROL_MARK << CONTROL_SHIFT) | CODE_TERMINATOR;
/// Announces that the next word is a stuffed payload word.
pub const ESCAPE_PREFIX: Word = (CONTROL_MARK << CONTROL_SHIFT) | CODE_ESCAPE;
/// Applied to a payload word after `ESCAPE_PREFIX`; flips a mark bit.
pub const STUFF_MASK: Word = 1 << 63;

pub fn is_control(word: Word) -> bool {
    word >> CONTROL_SHIFT == CONTROL_MARK
}

/// Pairs every item with whether it is the final one.
pub(crate) fn with_last<I: Iterator>(items: I) -> impl Iterator<Item = (I::Item, bool)> {
    items.with_position().map(|position| match position {
        Position::Last(item) | Position::Only(item) => (item, true),
        Position::First(item) | Position::Middle(item) => (item, false),
    })
}

/// Writes `word` to `out`, stuffing it when it collides with a control word.
fn stuff(word: Word, out: &mut VecDeque<Word>) {
    if is_control(word) {
        out.push_back(ESCAPE_PREFIX);
        out.push_back(word ^ STUFF_MASK);
    } else {
        out.push_back(word);
    }
}

/// A de-framed payload word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeframedWord {
    pub word: Word,
    /// Set on the final payload word of a frame.
    pub last: bool,
    /// Only meaningful on `last`: whether the whole frame passed its checks.
    pub valid: bool,
}

/// Per-frame error tallies kept by the de-framer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameErrorCounters {
    pub checksum: u32,
    pub framing: u32,
}

/// Egress half of the codec.
///
/// Accepts one producer word per cycle and releases one wire word per
/// cycle; `can_accept` tells the caller whether the staged wire words of the
/// previous input have drained.
#[derive(Clone, Debug)]
pub struct Framer {
    checksum: bool,
    crc: Crc64,
    staged: VecDeque<Word>,
    in_frame: bool,
    /// Set when a reset cut a producer frame; the tail is dropped.
    discarding: bool,
}

impl Framer {
    pub fn new(checksum: bool) -> Self {
        Self {
            checksum,
            crc: Crc64::new(),
            staged: VecDeque::with_capacity(4),
            in_frame: false,
            discarding: false,
        }
    }

    pub fn can_accept(&self) -> bool {
        self.staged.is_empty()
    }

    pub fn push(&mut self, word: Word, last: bool) {
        debug_assert!(self.can_accept());
        if self.discarding {
            log::debug!("framer: dropping tail word {:#018x} of a flushed frame", word);
            if last {
                self.discarding = false;
            }
            return;
        }
        self.in_frame = !last;
        stuff(word, &mut self.staged);
        if self.checksum {
            self.crc.update(word);
        }
        if last {
            if self.checksum {
                stuff(self.crc.value(), &mut self.staged);
                self.crc.reset();
            }
            self.staged.push_back(ESCAPE_TERMINATOR);
        }
    }

    pub fn peek(&self) -> Option<Word> {
        self.staged.front().copied()
    }

    pub fn pop(&mut self) -> Option<Word> {
        self.staged.pop_front()
    }

    /// Whether the producer is in the middle of a frame, including one
    /// whose tail is being discarded.
    pub fn in_frame(&self) -> bool {
        self.in_frame || self.discarding
    }

    /// Drops all staged words. With `cut` set the producer is known to be in
    /// the middle of a frame and the rest of that frame is discarded on
    /// arrival.
    pub fn reset(&mut self, cut: bool) {
        self.discarding = cut;
        self.in_frame = false;
        self.staged.clear();
        self.crc.reset();
    }
}

/// Ingress half of the codec.
///
/// Consumes one wire word at a time and produces at most one payload word.
/// The last one or two received words are held back until the next word
/// shows whether they were payload, checksum trailer, or the end of the
/// frame.
#[derive(Clone, Debug)]
pub struct Deframer {
    checksum: bool,
    crc: Crc64,
    held: VecDeque<Word>,
    escaped: bool,
    poisoned: bool,
    /// Set after a reset that may have lost the start of the frame on the
    /// wire; words up to the next terminator are dropped.
    skipping: bool,
    errors: FrameErrorCounters,
}

impl Deframer {
    pub fn new(checksum: bool) -> Self {
        Self {
            checksum,
            crc: Crc64::new(),
            held: VecDeque::with_capacity(3),
            escaped: false,
            poisoned: false,
            skipping: false,
            errors: FrameErrorCounters::default(),
        }
    }

    fn hold_depth(&self) -> usize {
        if self.checksum {
            2
        } else {
            1
        }
    }

    pub fn errors(&self) -> FrameErrorCounters {
        self.errors
    }

    /// Number of wire payload words received for the frame in progress that
    /// have not been released yet.
    pub fn held(&self) -> usize {
        self.held.len()
    }

    fn start_next_frame(&mut self) {
        self.held.clear();
        self.crc.reset();
        self.escaped = false;
        self.poisoned = false;
    }

    fn poison(&mut self, reason: &str) {
        if !self.poisoned {
            log::warn!("deframer: {}", reason);
        }
        self.poisoned = true;
    }

    pub fn push(&mut self, wire: Word) -> Option<DeframedWord> {
        if self.skipping {
            if wire == ESCAPE_TERMINATOR {
                self.skipping = false;
            } else {
                log::trace!("deframer: skipping {:#018x}", wire);
            }
            return None;
        }
        if is_control(wire) {
            if self.escaped {
                self.escaped = false;
                self.poison("control word after escape prefix");
            }
            return match wire & CONTROL_CODE_MASK {
                CODE_TERMINATOR => self.end_frame(),
                CODE_ESCAPE => {
                    self.escaped = true;
                    None
                }
                code => {
                    self.poison(&format!("unknown control code {:#06x}", code));
                    None
                }
            };
        }
        let word = if self.escaped {
            self.escaped = false;
            wire ^ STUFF_MASK
        } else {
            wire
        };
        self.held.push_back(word);
        if self.held.len() > self.hold_depth() {
            let released = self.held.pop_front()?;
            self.crc.update(released);
            return Some(DeframedWord {
                word: released,
                last: false,
                valid: true,
            });
        }
        None
    }

    fn end_frame(&mut self) -> Option<DeframedWord> {
        if self.held.is_empty() && !self.poisoned {
            // idle fill between frames
            return None;
        }
        if self.held.len() < self.hold_depth() {
            log::warn!("deframer: runt frame with {} word(s)", self.held.len());
            self.errors.framing = self.errors.framing.wrapping_add(1);
            self.start_next_frame();
            return None;
        }
        let word = self.held.pop_front()?;
        self.crc.update(word);
        let checksum_ok = if self.checksum {
            let expected = self.held.pop_front();
            expected == Some(self.crc.value())
        } else {
            true
        };
        if self.poisoned {
            self.errors.framing = self.errors.framing.wrapping_add(1);
        } else if !checksum_ok {
            log::debug!("deframer: checksum mismatch");
            self.errors.checksum = self.errors.checksum.wrapping_add(1);
        }
        let valid = checksum_ok && !self.poisoned;
        self.start_next_frame();
        Some(DeframedWord {
            word,
            last: true,
            valid,
        })
    }

    /// Drops the frame in progress and zeroes the error counters. With
    /// `resync` set the next wire words are dropped up to and including the
    /// next terminator.
    pub fn reset(&mut self, resync: bool) {
        self.start_next_frame();
        self.skipping = resync;
        self.errors = FrameErrorCounters::default();
    }
}

/// A complete frame recovered from the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub words: Vec<Word>,
    pub valid: bool,
}

/// Encodes one payload as wire words.
pub fn frame(payload: &[Word], checksum: bool) -> Vec<Word> {
    let mut framer = Framer::new(checksum);
    let mut wire = Vec::with_capacity(payload.len() + 2);
    for (word, last) in with_last(payload.iter()) {
        framer.push(*word, last);
        while let Some(wire_word) = framer.pop() {
            wire.push(wire_word);
        }
    }
    wire
}

/// Decodes a wire stream into the frames it completes. Words after the last
/// terminator are ignored.
pub fn deframe(wire: &[Word], checksum: bool) -> Vec<Frame> {
    let mut deframer = Deframer::new(checksum);
    let mut frames = vec![];
    let mut current = vec![];
    for out in wire.iter().filter_map(|word| deframer.push(*word)) {
        current.push(out.word);
        if out.last {
            frames.push(Frame {
                words: std::mem::take(&mut current),
                valid: out.valid,
            });
        }
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256StarStar;

    fn random_payload(rng: &mut Xoshiro256StarStar, len: usize) -> Vec<Word> {
        (0..len)
            .map(|_| match rng.gen_range(0..8) {
                0 => ESCAPE_TERMINATOR,
                1 => ESCAPE_PREFIX,
                2 => (CONTROL_MARK << CONTROL_SHIFT) | rng.gen_range(0..=0xFFFF),
                _ => rng.gen(),
            })
            .collect()
    }

    #[test]
    fn test_control_words() {
        assert!(is_control(ESCAPE_TERMINATOR));
        assert!(is_control(ESCAPE_PREFIX));
        assert!(!is_control(ESCAPE_TERMINATOR ^ STUFF_MASK));
        assert!(!is_control(0));
    }

    #[test]
    fn test_wire_layout() {
        let payload = [1, ESCAPE_TERMINATOR, 3];
        let wire = frame(&payload, false);
        assert_eq!(
            wire,
            vec![
                1,
                ESCAPE_PREFIX,
                ESCAPE_TERMINATOR ^ STUFF_MASK,
                3,
                ESCAPE_TERMINATOR
            ]
        );
        let wire = frame(&payload, true);
        assert_eq!(wire.len(), 6);
        assert_eq!(wire[4], crate::checksum::crc64_words(&payload));
        assert_eq!(*wire.last().unwrap(), ESCAPE_TERMINATOR);
    }

    #[test]
    fn test_round_trip() {
        let mut rng = Xoshiro256StarStar::seed_from_u64(0x5EED);
        for checksum in [false, true] {
            for len in 1..40 {
                let payload = random_payload(&mut rng, len);
                let frames = deframe(&frame(&payload, checksum), checksum);
                assert_eq!(
                    frames,
                    vec![Frame {
                        words: payload.clone(),
                        valid: true
                    }],
                    "len {} checksum {}",
                    len,
                    checksum
                );
            }
        }
    }

    #[test]
    fn test_back_to_back_frames_and_idle_fill() {
        let first = vec![10, 11, 12];
        let second = vec![ESCAPE_PREFIX];
        let mut wire = vec![ESCAPE_TERMINATOR, ESCAPE_TERMINATOR];
        wire.extend(frame(&first, true));
        wire.push(ESCAPE_TERMINATOR);
        wire.extend(frame(&second, true));
        let frames = deframe(&wire, true);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].words, first);
        assert_eq!(frames[1].words, second);
        assert!(frames.iter().all(|f| f.valid));
    }

    #[test]
    fn test_last_flag_only_on_final_word() {
        let payload = [5, 6, 7, 8];
        let mut deframer = Deframer::new(true);
        let out = frame(&payload, true)
            .into_iter()
            .filter_map(|w| deframer.push(w))
            .collect::<Vec<_>>();
        assert_eq!(out.len(), 4);
        assert_eq!(
            out.iter().map(|w| w.last).collect::<Vec<_>>(),
            vec![false, false, false, true]
        );
        assert!(out[3].valid);
    }

    #[test]
    fn test_single_word_corruption_detected() {
        let mut rng = Xoshiro256StarStar::seed_from_u64(7);
        for _ in 0..200 {
            let len = rng.gen_range(1..20);
            let payload = (0..len).map(|_| rng.gen::<u32>() as Word).collect::<Vec<_>>();
            let mut wire = frame(&payload, true);
            // corrupt any word but the terminator, leaving bits 63..16 alone
            let idx = rng.gen_range(0..wire.len() - 1);
            wire[idx] ^= 1 << rng.gen_range(0..16);
            let mut deframer = Deframer::new(true);
            let frames = deframe(&wire, true);
            assert_eq!(frames.len(), 1);
            assert!(!frames[0].valid);
            wire.iter().for_each(|w| {
                deframer.push(*w);
            });
            assert_eq!(deframer.errors().checksum, 1);
        }
    }

    #[test]
    fn test_lost_terminator_merges_into_bad_frame() {
        let mut wire = frame(&[1, 2, 3], true);
        assert_eq!(wire.pop(), Some(ESCAPE_TERMINATOR));
        wire.extend(frame(&[7, 8], true));
        let frames = deframe(&wire, true);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].words.len(), 6);
        assert!(!frames[0].valid);
        // the frame after the merged one is unaffected
        wire.extend(frame(&[9], true));
        let frames = deframe(&wire, true);
        assert_eq!(frames[1], Frame { words: vec![9], valid: true });
    }

    #[test]
    fn test_escape_before_terminator_is_framing_error() {
        let mut deframer = Deframer::new(false);
        assert_eq!(deframer.push(1), None);
        assert_eq!(deframer.push(ESCAPE_PREFIX), None);
        let out = deframer.push(ESCAPE_TERMINATOR).unwrap();
        assert!(out.last);
        assert!(!out.valid);
        assert_eq!(deframer.errors().framing, 1);
        assert_eq!(deframer.errors().checksum, 0);
    }

    #[test]
    fn test_unknown_control_code_poisons_frame() {
        let mut wire = frame(&[1, 2, 3], true);
        wire.insert(1, (CONTROL_MARK << CONTROL_SHIFT) | 0x1234);
        let frames = deframe(&wire, true);
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].valid);
    }

    #[test]
    fn test_runt_frame_counted() {
        let mut deframer = Deframer::new(true);
        assert_eq!(deframer.push(99), None);
        assert_eq!(deframer.push(ESCAPE_TERMINATOR), None);
        assert_eq!(deframer.errors().framing, 1);
        // the next frame decodes normally
        let out = frame(&[4], true)
            .into_iter()
            .filter_map(|w| deframer.push(w))
            .collect::<Vec<_>>();
        assert_eq!(
            out,
            vec![DeframedWord {
                word: 4,
                last: true,
                valid: true
            }]
        );
    }

    #[test]
    fn test_framer_reset_discards_cut_frame() {
        let mut framer = Framer::new(false);
        framer.push(1, false);
        assert_eq!(framer.pop(), Some(1));
        assert!(framer.in_frame());
        framer.reset(framer.in_frame());
        // the remaining words of the interrupted frame never reach the wire
        framer.push(2, false);
        framer.push(3, true);
        assert_eq!(framer.pop(), None);
        framer.push(4, true);
        assert_eq!(framer.pop(), Some(4));
        assert_eq!(framer.pop(), Some(ESCAPE_TERMINATOR));
        assert_eq!(framer.pop(), None);
    }

    #[test]
    fn test_framer_reset_between_frames_keeps_next_frame() {
        let mut framer = Framer::new(false);
        framer.push(1, true);
        assert!(!framer.in_frame());
        framer.reset(framer.in_frame());
        assert_eq!(framer.pop(), None);
        framer.push(2, true);
        assert_eq!(framer.pop(), Some(2));
    }

    #[test]
    fn test_deframer_resync_drops_partial_frame() {
        let mut wire = frame(&[1, 2, 3], false);
        wire.drain(..2);
        wire.extend(frame(&[7, 8], false));
        let mut deframer = Deframer::new(false);
        deframer.reset(true);
        let words = wire
            .iter()
            .filter_map(|word| deframer.push(*word))
            .map(|out| out.word)
            .collect::<Vec<_>>();
        assert_eq!(words, vec![7, 8]);
        assert_eq!(deframer.errors(), FrameErrorCounters::default());
    }
}

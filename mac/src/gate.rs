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

use std::collections::VecDeque;

use crate::codec::{with_last, DeframedWord};
use crate::{Error, StreamWord, Word};

/// PacketGate holds a frame back until its last word shows whether it is
/// good.
///
/// Good frames are committed and released word by word; bad frames are
/// discarded as a whole. The buffer holds at most `depth` words, counting
/// both the frame being received and committed words not yet delivered.
/// Frames longer than `depth` can never be judged and are dropped as
/// oversize.
///
/// With `drop_bad_frames` off the gate is cut-through: words are released as
/// soon as they arrive.
#[derive(Clone, Debug)]
pub struct PacketGate {
    depth: usize,
    drop_bad_frames: bool,
    pending: Vec<Word>,
    released: VecDeque<StreamWord>,
    /// Discarding the tail of an oversize frame.
    dropping: bool,
    bad_frames: u32,
    oversize_frames: u32,
}

impl PacketGate {
    pub fn new(depth: usize, drop_bad_frames: bool) -> Result<Self, Error> {
        if depth == 0 {
            return Err(Error::ZeroCapacity("frame buffer"));
        }
        Ok(Self {
            depth,
            drop_bad_frames,
            pending: Vec::with_capacity(depth),
            released: VecDeque::with_capacity(depth),
            dropping: false,
            bad_frames: 0,
            oversize_frames: 0,
        })
    }

    pub fn occupancy(&self) -> usize {
        self.pending.len() + self.released.len()
    }

    /// Whether the next word can be taken this cycle.
    pub fn can_accept(&self) -> bool {
        if !self.drop_bad_frames {
            return self.released.len() < self.depth;
        }
        // a frame that already fills the buffer is about to overflow and
        // its next word is accepted only to be discarded
        self.dropping || self.occupancy() < self.depth || self.pending.len() == self.depth
    }

    pub fn push(&mut self, input: DeframedWord) {
        if !self.drop_bad_frames {
            if input.last && !input.valid {
                self.bad_frames = self.bad_frames.wrapping_add(1);
            }
            self.released.push_back(StreamWord {
                word: input.word,
                last: input.last,
            });
            return;
        }
        if self.dropping {
            self.dropping = !input.last;
            return;
        }
        if self.pending.len() == self.depth {
            log::warn!(
                "gate: frame exceeds the {} word buffer; dropping it",
                self.depth
            );
            self.oversize_frames = self.oversize_frames.wrapping_add(1);
            self.pending.clear();
            self.dropping = !input.last;
            return;
        }
        self.pending.push(input.word);
        if !input.last {
            return;
        }
        if input.valid {
            self.released.extend(
                with_last(self.pending.drain(..)).map(|(word, last)| StreamWord { word, last }),
            );
        } else {
            log::debug!("gate: discarding bad frame of {} words", self.pending.len());
            self.bad_frames = self.bad_frames.wrapping_add(1);
            self.pending.clear();
        }
    }

    pub fn peek(&self) -> Option<StreamWord> {
        self.released.front().copied()
    }

    pub fn pop(&mut self) -> Option<StreamWord> {
        self.released.pop_front()
    }

    /// Bad frames seen; discarded unless the gate is cut-through.
    pub fn bad_frames(&self) -> u32 {
        self.bad_frames
    }

    pub fn oversize_frames(&self) -> u32 {
        self.oversize_frames
    }

    /// Drops everything buffered, including committed frames, and zeroes the
    /// counters.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.released.clear();
        self.dropping = false;
        self.bad_frames = 0;
        self.oversize_frames = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(gate: &mut PacketGate, words: &[Word], valid: bool) {
        for (idx, word) in words.iter().enumerate() {
            assert!(gate.can_accept());
            gate.push(DeframedWord {
                word: *word,
                last: idx + 1 == words.len(),
                valid,
            });
        }
    }

    fn drain(gate: &mut PacketGate) -> Vec<StreamWord> {
        std::iter::from_fn(|| gate.pop()).collect()
    }

    #[test]
    fn test_zero_depth_rejected() {
        assert!(PacketGate::new(0, true).is_err());
    }

    #[test]
    fn test_nothing_released_before_last() {
        let mut gate = PacketGate::new(8, true).unwrap();
        feed(&mut gate, &[1, 2], true);
        gate.push(DeframedWord {
            word: 3,
            last: false,
            valid: true,
        });
        let out = drain(&mut gate);
        assert_eq!(out.len(), 2);
        assert_eq!(gate.peek(), None);
        gate.push(DeframedWord {
            word: 4,
            last: true,
            valid: true,
        });
        let out = drain(&mut gate);
        assert_eq!(
            out.iter().map(|w| (w.word, w.last)).collect::<Vec<_>>(),
            vec![(3, false), (4, true)]
        );
    }

    #[test]
    fn test_bad_frame_discarded_whole() {
        let mut gate = PacketGate::new(8, true).unwrap();
        feed(&mut gate, &[1, 2, 3], false);
        assert!(drain(&mut gate).is_empty());
        assert_eq!(gate.bad_frames(), 1);
        feed(&mut gate, &[4], true);
        assert_eq!(drain(&mut gate), vec![StreamWord { word: 4, last: true }]);
    }

    #[test]
    fn test_frame_at_depth_passes_and_oversize_dropped() {
        let mut gate = PacketGate::new(4, true).unwrap();
        feed(&mut gate, &[1, 2, 3, 4], true);
        assert_eq!(drain(&mut gate).len(), 4);

        feed(&mut gate, &[1, 2, 3, 4, 5, 6], true);
        assert!(drain(&mut gate).is_empty());
        assert_eq!(gate.oversize_frames(), 1);
        assert_eq!(gate.occupancy(), 0);

        feed(&mut gate, &[7, 8], true);
        assert_eq!(drain(&mut gate).len(), 2);
    }

    #[test]
    fn test_backpressure_while_committed_words_wait() {
        let mut gate = PacketGate::new(4, true).unwrap();
        feed(&mut gate, &[1, 2, 3], true);
        assert!(gate.can_accept());
        gate.push(DeframedWord {
            word: 9,
            last: false,
            valid: true,
        });
        assert!(!gate.can_accept());
        assert_eq!(gate.pop().map(|w| w.word), Some(1));
        assert!(gate.can_accept());
    }

    #[test]
    fn test_cut_through_forwards_immediately() {
        let mut gate = PacketGate::new(2, false).unwrap();
        gate.push(DeframedWord {
            word: 1,
            last: false,
            valid: true,
        });
        assert_eq!(gate.pop(), Some(StreamWord { word: 1, last: false }));
        gate.push(DeframedWord {
            word: 2,
            last: true,
            valid: false,
        });
        assert_eq!(gate.pop(), Some(StreamWord { word: 2, last: true }));
        assert_eq!(gate.bad_frames(), 1);
    }

    #[test]
    fn test_reset_flushes_everything() {
        let mut gate = PacketGate::new(8, true).unwrap();
        feed(&mut gate, &[1, 2], true);
        gate.push(DeframedWord {
            word: 3,
            last: false,
            valid: true,
        });
        gate.reset();
        assert_eq!(gate.occupancy(), 0);
        assert_eq!(gate.pop(), None);
    }
}

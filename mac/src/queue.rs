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

//! Bounded, order preserving queues shared between the physical and the
//! system domain.
//!
//! A queue is created as a producer/consumer pair. Each half may live on a
//! different thread (or be stepped at a different frequency by the
//! simulator); the ring itself is the only state they share, and every word
//! is handed over whole under the ring's lock. Neither side ever blocks:
//! `push` on a full queue hands the word back, `pop` on an empty queue
//! returns `None`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::Error;

struct Ring<T> {
    /// Circular buffer holding the queued items.
    buffer: Vec<Option<T>>,

    /// The write pointer into the circular buffer (producer side).
    write_idx: usize,

    /// The read pointer into the circular buffer (consumer side).
    read_idx: usize,

    /// The number of items in the buffer.
    occupancy: usize,
}

impl<T> Ring<T> {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: (0..capacity).map(|_| None).collect(),
            write_idx: 0,
            read_idx: 0,
            occupancy: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn push(&mut self, item: T) -> Result<(), T> {
        if self.occupancy == self.capacity() {
            return Err(item);
        }
        self.buffer[self.write_idx] = Some(item);
        self.write_idx = (self.write_idx + 1) % self.capacity();
        self.occupancy += 1;
        Ok(())
    }

    fn pop(&mut self) -> Option<T> {
        if self.occupancy == 0 {
            return None;
        }
        let item = self.buffer[self.read_idx].take();
        self.read_idx = (self.read_idx + 1) % self.capacity();
        self.occupancy -= 1;
        item
    }

    fn peek(&self) -> Option<&T> {
        if self.occupancy == 0 {
            None
        } else {
            self.buffer[self.read_idx].as_ref()
        }
    }

    fn flush(&mut self) -> usize {
        let flushed = self.occupancy;
        while self.pop().is_some() {}
        flushed
    }
}

fn lock<T>(ring: &Mutex<Ring<T>>) -> MutexGuard<'_, Ring<T>> {
    // A panicking peer leaves the ring itself consistent; every mutation is
    // completed before the guard is released.
    ring.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The writing half of a flow queue.
pub struct QueueProducer<T> {
    ring: Arc<Mutex<Ring<T>>>,
}

/// The reading half of a flow queue.
pub struct QueueConsumer<T> {
    ring: Arc<Mutex<Ring<T>>>,
}

/// Creates a queue holding at most `capacity` items and returns its two
/// halves.
pub fn flow_queue<T>(capacity: usize) -> Result<(QueueProducer<T>, QueueConsumer<T>), Error> {
    if capacity == 0 {
        return Err(Error::ZeroCapacity("flow queue"));
    }
    let ring = Arc::new(Mutex::new(Ring::new(capacity)));
    Ok((
        QueueProducer {
            ring: Arc::clone(&ring),
        },
        QueueConsumer { ring },
    ))
}

impl<T> QueueProducer<T> {
    /// Appends `item`; a full queue hands the item back untouched.
    pub fn push(&self, item: T) -> Result<(), T> {
        lock(&self.ring).push(item)
    }

    pub fn occupied(&self) -> usize {
        lock(&self.ring).occupancy
    }

    pub fn space(&self) -> usize {
        let ring = lock(&self.ring);
        ring.capacity() - ring.occupancy
    }

    pub fn capacity(&self) -> usize {
        lock(&self.ring).capacity()
    }
}

impl<T> QueueConsumer<T> {
    /// Removes the oldest item.
    pub fn pop(&self) -> Option<T> {
        lock(&self.ring).pop()
    }

    /// Discards everything queued and returns how many items were dropped.
    pub fn flush(&self) -> usize {
        lock(&self.ring).flush()
    }

    pub fn occupied(&self) -> usize {
        lock(&self.ring).occupancy
    }

    pub fn space(&self) -> usize {
        let ring = lock(&self.ring);
        ring.capacity() - ring.occupancy
    }

    pub fn capacity(&self) -> usize {
        lock(&self.ring).capacity()
    }
}

impl<T: Clone> QueueConsumer<T> {
    /// Returns a copy of the oldest item without removing it.
    pub fn peek(&self) -> Option<T> {
        lock(&self.ring).peek().cloned()
    }
}

impl<T> std::fmt::Debug for QueueProducer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = lock(&self.ring);
        write!(f, "QueueProducer({}/{})", ring.occupancy, ring.capacity())
    }
}

impl<T> std::fmt::Debug for QueueConsumer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = lock(&self.ring);
        write!(f, "QueueConsumer({}/{})", ring.occupancy, ring.capacity())
    }
}

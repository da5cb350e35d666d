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

//! One adapter: the physical and system domain halves, the mode multiplexer,
//! and the user facing RX/TX ports.
//!
//! ```text
//!             ingress queue               rx queue
//!   PHY RX ──────────────────▶ deframer ─▶ gate ──────────▶ RxPort
//!      │                        │ checker │
//!      │       egress queue     │ loopback│                 tx queue
//!   PHY TX ◀────────────────── framer / generator ◀──────── TxPort
//!   PhyDomain                         SysDomain
//! ```
//!
//! The halves share nothing but flow queues, so each can be stepped at its
//! own rate or on its own thread.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::bist::{BistChecker, BistGenerator};
use crate::codec::{with_last, Deframer, Framer};
use crate::config::MacConfiguration;
use crate::gate::PacketGate;
use crate::link::{ClearSync, LinkInputs, LinkSnapshot, LinkStatus, LinkSupervisor};
use crate::queue::{flow_queue, QueueConsumer, QueueProducer};
use crate::vcd::{VcdComponent, VcdWriter};
use crate::{Error, Word};

/// A word on the user facing interfaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamWord {
    pub word: Word,
    pub last: bool,
}

/// What the data path carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Normal,
    /// TX carries the PRBS generator, RX is the normal path.
    BistGenerate,
    /// RX feeds the PRBS checker, TX is the normal path.
    BistCheck,
    /// RX words are sent straight back on TX.
    Loopback,
}

impl Mode {
    /// Maps the three enable controls onto a mode. Checker wins over
    /// loopback, which wins over the generator.
    pub fn from_controls(generator: bool, checker: bool, loopback: bool) -> Self {
        if checker {
            Self::BistCheck
        } else if loopback {
            Self::Loopback
        } else if generator {
            Self::BistGenerate
        } else {
            Self::Normal
        }
    }

    /// Whether the mode needs the self-test engine.
    pub fn uses_bist(&self) -> bool {
        *self != Self::Normal
    }
}

/// Status counters and levels of one adapter, as seen from the system
/// domain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Status {
    pub overruns: u32,
    pub soft_errors: u32,
    pub checksum_errors: u32,
    pub framing_errors: u32,
    /// Frames that failed a check at the packet gate.
    pub bad_frames: u32,
    pub oversize_frames: u32,
    pub bist_locked: bool,
    pub bist_samples: u64,
    pub bist_errors: u64,
    pub clear: bool,
    pub mode: Mode,
    pub ingress_occupancy: usize,
    pub egress_occupancy: usize,
    pub gate_occupancy: usize,
    pub rx_occupancy: usize,
    pub tx_occupancy: usize,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "mode:            {:?}", self.mode)?;
        writeln!(f, "clear:           {}", self.clear)?;
        writeln!(f, "overruns:        {}", self.overruns)?;
        writeln!(f, "soft errors:     {}", self.soft_errors)?;
        writeln!(f, "checksum errors: {}", self.checksum_errors)?;
        writeln!(f, "framing errors:  {}", self.framing_errors)?;
        writeln!(f, "bad frames:      {}", self.bad_frames)?;
        writeln!(f, "oversize frames: {}", self.oversize_frames)?;
        write!(
            f,
            "bist:            locked {}, {} samples, {} errors",
            self.bist_locked, self.bist_samples, self.bist_errors
        )
    }
}

/// The half clocked by the transceiver.
#[derive(Debug)]
pub struct PhyDomain {
    supervisor: LinkSupervisor,
    ingress: QueueProducer<Word>,
    egress: QueueConsumer<Word>,
    last_rx: Option<Word>,
    last_tx: Option<Word>,
}

impl PhyDomain {
    /// Runs one physical cycle: samples the link, takes the received word
    /// (if any), and returns the word to transmit when `tx_ready`.
    ///
    /// A received word that does not fit in the ingress queue is lost and
    /// counted as an overrun. While `clear` is asserted received words are
    /// dropped and queued egress words are flushed.
    pub fn step(&mut self, link: LinkInputs, rx: Option<Word>, tx_ready: bool) -> Option<Word> {
        let clear = self.supervisor.sample(link);
        if cfg!(feature = "trace-phy-words") {
            log::trace!("phy: rx {:x?}", rx);
        }
        self.last_rx = rx;
        if let Some(word) = rx {
            if !clear && self.ingress.push(word).is_err() {
                log::debug!("phy: ingress full, dropping {:#018x}", word);
                self.supervisor.record_overrun();
            }
        }
        let tx = if clear {
            let flushed = self.egress.flush();
            if flushed > 0 {
                log::debug!("phy: flushed {} egress words", flushed);
            }
            None
        } else if tx_ready {
            self.egress.pop()
        } else {
            None
        };
        if cfg!(feature = "trace-phy-words") {
            log::trace!("phy: tx {:x?}", tx);
        }
        self.last_tx = tx;
        self.supervisor.publish();
        tx
    }

    pub fn link_status(&self) -> LinkStatus {
        self.supervisor.status()
    }

    pub fn clear(&self) -> bool {
        self.supervisor.clear()
    }

    /// Counters as the physical domain holds them right now.
    pub fn counters(&self) -> LinkSnapshot {
        self.supervisor.snapshot()
    }
}

impl VcdComponent for PhyDomain {
    fn vcd_write_scope(&self, writer: Rc<RefCell<VcdWriter>>) {
        let _scope = VcdWriter::managed_decl_scope(Rc::clone(&writer), "phy");
        let mut writer = writer.borrow_mut();
        writer.add_wire(1, "clear");
        writer.add_wire(64, "rx_word");
        writer.add_wire(64, "tx_word");
        writer.add_integer_var::<u32>("overruns");
        writer.add_integer_var::<u32>("soft_errors");
    }

    fn vcd_init(&self, writer: Rc<RefCell<VcdWriter>>) {
        let _scope = VcdWriter::managed_trace_scope(Rc::clone(&writer), "phy");
        let mut writer = writer.borrow_mut();
        writer.change_vector_immediately("clear", 1);
        writer.change_vector_immediately("overruns", 0);
        writer.change_vector_immediately("soft_errors", 0);
    }

    fn vcd_trace(&self, writer: Rc<RefCell<VcdWriter>>) {
        let _scope = VcdWriter::managed_trace_scope(Rc::clone(&writer), "phy");
        let counters = self.counters();
        let mut writer = writer.borrow_mut();
        writer.change_vector("clear", counters.clear as u64);
        writer.change_word("rx_word", self.last_rx);
        writer.change_word("tx_word", self.last_tx);
        writer.change_vector("overruns", counters.overruns as u64);
        writer.change_vector("soft_errors", counters.soft_errors as u64);
    }
}

/// The half clocked by the local consumer and producer.
#[derive(Debug)]
pub struct SysDomain {
    frame_mode: bool,
    bist_enabled: bool,
    mode: Mode,
    sync: ClearSync,
    ingress: QueueConsumer<Word>,
    egress: QueueProducer<Word>,
    rx: QueueProducer<StreamWord>,
    tx: QueueConsumer<StreamWord>,
    deframer: Deframer,
    framer: Framer,
    gate: PacketGate,
    generator: BistGenerator,
    checker: BistChecker,
}

impl SysDomain {
    /// Runs one system cycle: moves at most one word in each direction
    /// through the stage selected by the current mode.
    pub fn step(&mut self) {
        if self.sync.update() {
            self.flush();
            return;
        }
        self.receive();
        self.transmit();
    }

    /// Resets the data path while `clear` is asserted. Complete frames in
    /// the RX queue stay; everything in flight is dropped.
    ///
    /// When the physical domain has already left `clear`, the flushed
    /// ingress words may include the start of a frame received after it, so
    /// the deframer skips to the next terminator.
    fn flush(&mut self) {
        let dropped = self.ingress.flush();
        if dropped > 0 {
            log::debug!("sys: flushed {} ingress words", dropped);
        }
        self.deframer.reset(dropped > 0 && !self.sync.asserted());
        self.gate.reset();
        let mut cut = self.framer.in_frame();
        while let Some(input) = self.tx.pop() {
            log::trace!("sys: flushing tx word {:#018x}", input.word);
            cut = !input.last;
        }
        self.framer.reset(cut && self.frame_mode);
        self.generator.reset();
        self.checker.reset();
    }

    fn receive(&mut self) {
        match self.mode {
            Mode::BistCheck => {
                if let Some(word) = self.ingress.pop() {
                    self.checker.check(word);
                }
            }
            Mode::Loopback => {
                if let Some(word) = self.ingress.peek() {
                    if self.egress.push(word).is_ok() {
                        self.ingress.pop();
                    }
                }
            }
            Mode::Normal | Mode::BistGenerate if self.frame_mode => self.receive_frames(),
            Mode::Normal | Mode::BistGenerate => self.receive_stream(),
        }
    }

    fn receive_frames(&mut self) {
        if let Some(word) = self.gate.peek() {
            if self.rx.push(word).is_ok() {
                self.gate.pop();
            }
        }
        if !self.gate.can_accept() {
            return;
        }
        if let Some(out) = self.ingress.pop().and_then(|wire| self.deframer.push(wire)) {
            self.gate.push(out);
        }
    }

    fn receive_stream(&mut self) {
        if let Some(word) = self.ingress.peek() {
            if self.rx.push(StreamWord { word, last: false }).is_ok() {
                self.ingress.pop();
            }
        }
    }

    fn transmit(&mut self) {
        match self.mode {
            Mode::BistGenerate => {
                let ready = self.egress.space() > 0;
                if let Some(word) = self.generator.next(ready) {
                    if self.egress.push(word).is_err() {
                        log::debug!("sys: egress refused bist word {:#018x}", word);
                    }
                }
            }
            // looped words went out in `receive`; producer words wait
            Mode::Loopback => {}
            Mode::Normal | Mode::BistCheck if self.frame_mode => self.transmit_frames(),
            Mode::Normal | Mode::BistCheck => self.transmit_stream(),
        }
    }

    fn transmit_frames(&mut self) {
        if let Some(word) = self.framer.peek() {
            if self.egress.push(word).is_ok() {
                self.framer.pop();
            }
        }
        if !self.framer.can_accept() {
            return;
        }
        if let Some(input) = self.tx.pop() {
            self.framer.push(input.word, input.last);
        }
    }

    fn transmit_stream(&mut self) {
        if let Some(input) = self.tx.peek() {
            if self.egress.push(input.word).is_ok() {
                self.tx.pop();
            }
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Switches the data path; takes effect on the next cycle. Leaving a
    /// BIST mode resets the engine it used.
    pub fn set_mode(&mut self, mode: Mode) -> Result<(), Error> {
        if mode.uses_bist() && !self.bist_enabled {
            return Err(Error::BistDisabled(mode));
        }
        if mode == self.mode {
            return Ok(());
        }
        match self.mode {
            Mode::BistCheck => self.checker.reset(),
            Mode::BistGenerate => self.generator.reset(),
            _ => {}
        }
        log::info!("sys: mode {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
        Ok(())
    }

    /// `set_mode` driven by the three enable controls.
    pub fn set_controls(
        &mut self,
        generator: bool,
        checker: bool,
        loopback: bool,
    ) -> Result<(), Error> {
        self.set_mode(Mode::from_controls(generator, checker, loopback))
    }

    pub fn set_generator_rate(&mut self, rate: u8) -> Result<(), Error> {
        if !self.bist_enabled {
            return Err(Error::BistDisabled(Mode::BistGenerate));
        }
        self.generator.set_rate(rate)
    }

    /// The synchronized `clear`.
    pub fn clear(&self) -> bool {
        self.sync.clear()
    }

    pub fn status(&self) -> Status {
        let link = self.sync.snapshot();
        let errors = self.deframer.errors();
        Status {
            overruns: link.overruns,
            soft_errors: link.soft_errors,
            checksum_errors: errors.checksum,
            framing_errors: errors.framing,
            bad_frames: self.gate.bad_frames(),
            oversize_frames: self.gate.oversize_frames(),
            bist_locked: self.checker.locked(),
            bist_samples: self.checker.samples(),
            bist_errors: self.checker.errors(),
            clear: self.sync.clear(),
            mode: self.mode,
            ingress_occupancy: self.ingress.occupied(),
            egress_occupancy: self.egress.occupied(),
            gate_occupancy: self.gate.occupancy(),
            rx_occupancy: self.rx.occupied(),
            tx_occupancy: self.tx.occupied(),
        }
    }
}

impl VcdComponent for SysDomain {
    fn vcd_write_scope(&self, writer: Rc<RefCell<VcdWriter>>) {
        let _scope = VcdWriter::managed_decl_scope(Rc::clone(&writer), "sys");
        let mut writer = writer.borrow_mut();
        writer.add_wire(1, "clear");
        writer.add_wire(2, "mode");
        writer.add_integer_var::<u32>("checksum_errors");
        writer.add_integer_var::<u32>("framing_errors");
        writer.add_wire(1, "bist_locked");
        writer.add_wire(48, "bist_samples");
        writer.add_wire(48, "bist_errors");
        writer.add_integer_var::<u32>("gate_occupancy");
    }

    fn vcd_init(&self, writer: Rc<RefCell<VcdWriter>>) {
        let _scope = VcdWriter::managed_trace_scope(Rc::clone(&writer), "sys");
        let mut writer = writer.borrow_mut();
        writer.change_vector_immediately("clear", 1);
        writer.change_vector_immediately("mode", self.mode as u64);
    }

    fn vcd_trace(&self, writer: Rc<RefCell<VcdWriter>>) {
        let _scope = VcdWriter::managed_trace_scope(Rc::clone(&writer), "sys");
        let status = self.status();
        let mut writer = writer.borrow_mut();
        writer.change_vector("clear", status.clear as u64);
        writer.change_vector("mode", status.mode as u64);
        writer.change_vector("checksum_errors", status.checksum_errors as u64);
        writer.change_vector("framing_errors", status.framing_errors as u64);
        writer.change_vector("bist_locked", status.bist_locked as u64);
        writer.change_vector("bist_samples", status.bist_samples);
        writer.change_vector("bist_errors", status.bist_errors);
        writer.change_vector("gate_occupancy", status.gate_occupancy as u64);
    }
}

/// Consumer side of the RX interface.
#[derive(Debug)]
pub struct RxPort {
    queue: QueueConsumer<StreamWord>,
    partial: Vec<Word>,
}

impl RxPort {
    pub fn pop(&self) -> Option<StreamWord> {
        self.queue.pop()
    }

    /// Collects words until a complete frame is available. Don't mix with
    /// `pop` in the middle of a frame.
    pub fn pop_frame(&mut self) -> Option<Vec<Word>> {
        while let Some(input) = self.queue.pop() {
            self.partial.push(input.word);
            if input.last {
                return Some(std::mem::take(&mut self.partial));
            }
        }
        None
    }

    pub fn occupied(&self) -> usize {
        self.queue.occupied()
    }
}

/// Producer side of the TX interface.
#[derive(Debug)]
pub struct TxPort {
    queue: QueueProducer<StreamWord>,
}

impl TxPort {
    /// Returns false, leaving the word with the caller, when the TX queue
    /// is full.
    pub fn push(&self, word: Word, last: bool) -> bool {
        self.queue.push(StreamWord { word, last }).is_ok()
    }

    /// Queues a whole frame, or nothing if it doesn't fit.
    pub fn push_frame(&self, words: &[Word]) -> bool {
        if words.is_empty() || self.queue.space() < words.len() {
            return false;
        }
        with_last(words.iter()).all(|(word, last)| self.push(*word, last))
    }

    pub fn space(&self) -> usize {
        self.queue.space()
    }
}

/// A complete adapter. Use `into_parts` to drive the two domains from
/// separate threads.
#[derive(Debug)]
pub struct Mac {
    phy: PhyDomain,
    sys: SysDomain,
    rx: RxPort,
    tx: TxPort,
}

impl Mac {
    pub fn new(config: &MacConfiguration) -> Result<Self, Error> {
        config.validate()?;
        let (ingress_tx, ingress_rx) = flow_queue(config.ingress_capacity)?;
        let (egress_tx, egress_rx) = flow_queue(config.egress_capacity)?;
        let (rx_tx, rx_rx) = flow_queue(config.rx_capacity)?;
        let (tx_tx, tx_rx) = flow_queue(config.tx_capacity)?;
        let (status_tx, status_rx) = flow_queue(config.status_sync_depth)?;
        Ok(Self {
            phy: PhyDomain {
                supervisor: LinkSupervisor::new(status_tx),
                ingress: ingress_tx,
                egress: egress_rx,
                last_rx: None,
                last_tx: None,
            },
            sys: SysDomain {
                frame_mode: config.frame_mode,
                bist_enabled: config.bist_enabled,
                mode: Mode::Normal,
                sync: ClearSync::new(status_rx),
                ingress: ingress_rx,
                egress: egress_tx,
                rx: rx_tx,
                tx: tx_rx,
                deframer: Deframer::new(config.checksum),
                framer: Framer::new(config.checksum),
                gate: PacketGate::new(config.frame_buffer_depth, config.drop_bad_frames)?,
                generator: BistGenerator::new(),
                checker: BistChecker::new(),
            },
            rx: RxPort {
                queue: rx_rx,
                partial: vec![],
            },
            tx: TxPort { queue: tx_tx },
        })
    }

    pub fn phy(&self) -> &PhyDomain {
        &self.phy
    }

    pub fn phy_mut(&mut self) -> &mut PhyDomain {
        &mut self.phy
    }

    pub fn sys(&self) -> &SysDomain {
        &self.sys
    }

    pub fn sys_mut(&mut self) -> &mut SysDomain {
        &mut self.sys
    }

    pub fn rx(&mut self) -> &mut RxPort {
        &mut self.rx
    }

    pub fn tx(&self) -> &TxPort {
        &self.tx
    }

    pub fn status(&self) -> Status {
        self.sys.status()
    }

    pub fn parts_mut(&mut self) -> (&mut PhyDomain, &mut SysDomain, &mut RxPort, &TxPort) {
        (&mut self.phy, &mut self.sys, &mut self.rx, &self.tx)
    }

    pub fn into_parts(self) -> (PhyDomain, SysDomain, RxPort, TxPort) {
        (self.phy, self.sys, self.rx, self.tx)
    }
}

impl VcdComponent for Mac {
    fn vcd_write_scope(&self, writer: Rc<RefCell<VcdWriter>>) {
        self.phy.vcd_write_scope(Rc::clone(&writer));
        self.sys.vcd_write_scope(writer);
    }

    fn vcd_init(&self, writer: Rc<RefCell<VcdWriter>>) {
        self.phy.vcd_init(Rc::clone(&writer));
        self.sys.vcd_init(writer);
    }

    fn vcd_trace(&self, writer: Rc<RefCell<VcdWriter>>) {
        self.phy.vcd_trace(Rc::clone(&writer));
        self.sys.vcd_trace(writer);
    }
}

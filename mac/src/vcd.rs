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

//! Waveform dumps of a simulation.
//!
//! Components declare their signals once through `VcdComponent` and then
//! record value changes every cycle. Changes recorded during a cycle are
//! deferred and land in the dump at the start of the next cycle.

use bitvec::prelude::*;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Display;
use std::fs;
use std::io;
use std::path::Path;
use std::rc::Rc;

use crate::Word;

pub const DEFAULT_TOP_MODULE: &str = "link_simulation";
const DEFAULT_VCD_HEADER: &str = "aurora_mac VCD";

#[derive(Clone, PartialEq)]
enum SizedData {
    Filled(BitBox<usize, Lsb0>),
    Undefined(usize),
}

impl SizedData {
    fn from_value(value: u64, width: usize) -> Self {
        let mut bits = bitvec![usize, Lsb0; 0; width];
        for idx in 0..width.min(64) {
            bits.set(idx, (value >> idx) & 1 == 1);
        }
        Self::Filled(bits.into_boxed_bitslice())
    }

    fn to_values(&self) -> Vec<vcd::Value> {
        match self {
            Self::Filled(data) => data.iter().rev().map(|bit| (*bit).into()).collect(),
            Self::Undefined(width) => vec![vcd::Value::X; *width],
        }
    }
}

pub struct VcdWriter {
    writer: vcd::Writer<fs::File>,
    failed: bool,
    scope_stack: Vec<String>,
    ids: HashMap<String, vcd::IdCode>,
    widths: HashMap<vcd::IdCode, usize>,
    last_values: HashMap<vcd::IdCode, SizedData>,
    pending_changes: HashMap<vcd::IdCode, SizedData>,
    timestamp: u64,
}

pub struct VcdTraceScope {
    writer: Rc<RefCell<VcdWriter>>,
    scope: String,
}

impl Drop for VcdTraceScope {
    fn drop(&mut self) {
        self.writer.borrow_mut().leave_scope(self.scope.as_str());
    }
}

pub struct VcdDeclScope {
    writer: Rc<RefCell<VcdWriter>>,
    scope: String,
}

impl Drop for VcdDeclScope {
    fn drop(&mut self) {
        self.writer.borrow_mut().upscope(self.scope.as_str());
    }
}

impl VcdWriter {
    pub fn create<P: AsRef<Path>>(dst: P) -> io::Result<Self> {
        let file = fs::File::create(dst.as_ref())?;
        log::debug!("VCD file: {}", dst.as_ref().display());
        Ok(Self {
            writer: vcd::Writer::new(file),
            failed: false,
            scope_stack: vec![],
            ids: HashMap::new(),
            widths: HashMap::new(),
            last_values: HashMap::new(),
            pending_changes: HashMap::new(),
            timestamp: 0,
        })
    }

    /// Runs a raw write, latching the first failure. Once a write has failed
    /// the dump is abandoned but the simulation carries on.
    fn guarded<F>(&mut self, f: F)
    where
        F: FnOnce(&mut Self) -> io::Result<()>,
    {
        if self.failed {
            return;
        }
        if let Err(err) = f(self) {
            self.failed = true;
            log::error!("VCD writing failed with error {:?}", err);
        }
    }

    pub fn managed_decl_scope<T>(writer: Rc<RefCell<VcdWriter>>, scope: &T) -> VcdDeclScope
    where
        T: Display + ?Sized,
    {
        writer.borrow_mut().add_module(scope);
        VcdDeclScope {
            writer: Rc::clone(&writer),
            scope: scope.to_string(),
        }
    }

    pub fn managed_trace_scope<T>(writer: Rc<RefCell<VcdWriter>>, scope: &T) -> VcdTraceScope
    where
        T: Display + ?Sized,
    {
        writer.borrow_mut().scope_stack.push(scope.to_string());
        VcdTraceScope {
            writer: Rc::clone(&writer),
            scope: scope.to_string(),
        }
    }

    /// Declares every signal of `top` and records their initial values at
    /// time zero.
    pub fn write_header(writer: Rc<RefCell<Self>>, top: &dyn VcdComponent) {
        writer.borrow_mut().guarded(|this| {
            this.writer.comment(DEFAULT_VCD_HEADER)?;
            this.writer.date(chrono::Utc::now().to_string().as_str())
        });
        top.vcd_write_scope(Rc::clone(&writer));
        writer
            .borrow_mut()
            .guarded(|this| this.writer.enddefinitions());
        writer.borrow_mut().enter_cycle();
        top.vcd_init(Rc::clone(&writer));
        writer.borrow_mut().end_cycle();
    }

    fn record_change(&mut self, id_code: vcd::IdCode, sized_data: SizedData) {
        if self.last_values.get(&id_code) == Some(&sized_data) {
            return;
        }
        self.guarded(|this| this.writer.change_vector(id_code, &sized_data.to_values()));
        self.last_values.insert(id_code, sized_data);
    }

    fn sized(&self, id_code: vcd::IdCode, value: Option<u64>) -> SizedData {
        let width = self.widths.get(&id_code).copied().unwrap_or(64);
        match value {
            Some(value) => SizedData::from_value(value, width),
            None => SizedData::Undefined(width),
        }
    }

    /// Records a change that shows up at the start of the next cycle.
    pub fn change_vector(&mut self, name: &str, value: u64) {
        self.change(name, Some(value));
    }

    /// Like `change_vector`; an idle word is dumped as undefined.
    pub fn change_word(&mut self, name: &str, word: Option<Word>) {
        self.change(name, word);
    }

    fn change(&mut self, name: &str, value: Option<u64>) {
        if let Some(id_code) = self.lookup_id_code(name) {
            if cfg!(feature = "trace-echo-vcd-signal-changes") {
                log::trace!("vcd: {} changed", self.scoped_name(name));
            }
            let sized_data = self.sized(id_code, value);
            self.pending_changes.insert(id_code, sized_data);
        }
    }

    pub fn change_vector_immediately(&mut self, name: &str, value: u64) {
        if let Some(id_code) = self.lookup_id_code(name) {
            if cfg!(feature = "trace-echo-vcd-signal-changes") {
                log::trace!("vcd: {} changed", self.scoped_name(name));
            }
            let sized_data = self.sized(id_code, Some(value));
            self.record_change(id_code, sized_data);
        }
    }

    fn lookup_id_code(&self, name: &str) -> Option<vcd::IdCode> {
        let scoped_name = self.scoped_name(name);
        let id_code = self.ids.get(scoped_name.as_str()).copied();
        if id_code.is_none() {
            log::warn!(
                "VCD signal {} was never declared",
                scoped_name
            );
        }
        id_code
    }

    pub fn enter_cycle(&mut self) {
        let timestamp = self.timestamp;
        self.guarded(|this| this.writer.timestamp(timestamp));
        let pending_changes: Vec<_> = self.pending_changes.drain().collect();
        for (id_code, data) in pending_changes {
            self.record_change(id_code, data);
        }
    }

    pub fn end_cycle(&mut self) {
        self.timestamp += 1;
    }

    /// Writes out the changes recorded during the final cycle.
    pub fn flush_after_simulation(&mut self) {
        self.enter_cycle();
        self.end_cycle();
    }

    fn leave_scope(&mut self, scope: &str) {
        match self.scope_stack.pop() {
            Some(popped) => debug_assert_eq!(popped, scope),
            None => log::error!("VCD scope {} left without entering it", scope),
        }
    }

    fn add_module<T: Display + ?Sized>(&mut self, name: &T) {
        let name = name.to_string();
        self.guarded(|this| this.writer.add_module(&name));
        self.scope_stack.push(name);
    }

    fn upscope(&mut self, scope: &str) {
        self.leave_scope(scope);
        self.guarded(|this| this.writer.upscope());
    }

    pub fn add_integer_var<T: Sized>(&mut self, reference: &str) {
        self.add_var(
            vcd::VarType::Integer,
            std::mem::size_of::<T>() * 8,
            reference,
        );
    }

    pub fn add_wire(&mut self, width: usize, reference: &str) {
        self.add_var(vcd::VarType::Wire, width, reference);
    }

    fn add_var(&mut self, var_type: vcd::VarType, width: usize, reference: &str) {
        let mut var_id = None;
        self.guarded(|this| {
            var_id = Some(
                this.writer
                    .add_var(var_type, width as u32, reference, None)?,
            );
            Ok(())
        });
        if let Some(var_id) = var_id {
            let scoped_name = self.scoped_name(reference);
            if self.ids.insert(scoped_name.clone(), var_id).is_some() {
                log::warn!(
                    "VCD signal {} declared twice",
                    scoped_name
                );
            }
            self.widths.insert(var_id, width);
        }
    }

    fn scoped_name(&self, name: &str) -> String {
        self.scope_stack.join(".") + "." + name
    }
}

/// An object implementing the VcdComponent can declare and record values to
/// be traced by a VCD. Each such object is responsible for calling their inner
/// VcdComponent objects.
///
/// All three calls must open the same scope names, so that the scoped
/// signal names recorded by `vcd_init` and `vcd_trace` match the ones
/// declared by `vcd_write_scope`.
pub trait VcdComponent {
    /// Declares the signals of this component.
    fn vcd_write_scope(&self, vcd_writer: Rc<RefCell<VcdWriter>>);

    /// Records initial values, before the first simulated cycle.
    fn vcd_init(&self, vcd_writer: Rc<RefCell<VcdWriter>>);

    /// Records the values after a simulated cycle.
    fn vcd_trace(&self, vcd_writer: Rc<RefCell<VcdWriter>>);
}

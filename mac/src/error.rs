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

use std::fmt;

use crate::Mode;

#[derive(Debug, Eq, PartialEq)]
pub enum Error {
    /// A queue or buffer was configured with no room at all.
    ZeroCapacity(&'static str),
    /// A configuration value is out of its legal range.
    InvalidConfiguration(String),
    /// BIST generator rates are 5 bits wide.
    InvalidRate(u8),
    /// The adapter was built without the self-test engine.
    BistDisabled(Mode),
    /// A simulation endpoint index other than 0 or 1.
    InvalidEndpoint(usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ZeroCapacity(name) => {
                write!(f, "ERROR: {} must have a capacity of at least one word", name)
            }
            Self::InvalidConfiguration(reason) => {
                write!(f, "ERROR: Invalid configuration: {}", reason)
            }
            Self::InvalidRate(rate) => {
                write!(
                    f,
                    "ERROR: Invalid BIST generator rate {} (expected 0..={})",
                    rate,
                    crate::bist::MAX_GENERATOR_RATE
                )
            }
            Self::BistDisabled(mode) => {
                write!(f, "ERROR: Mode {:?} requires the BIST engine", mode)
            }
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::error::Error for Error {}

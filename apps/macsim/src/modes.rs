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

use std::str::FromStr;

// Frames sends random frames from endpoint 0 to endpoint 1.
// Bist runs the PRBS generator on endpoint 0 and the checker on endpoint 1.
// Loopback sends frames from endpoint 0 and loops them back at endpoint 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    Frames,
    Bist,
    Loopback,
}

impl FromStr for RunMode {
    type Err = std::io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Frames" => Ok(RunMode::Frames),
            "Bist" => Ok(RunMode::Bist),
            "Loopback" => Ok(RunMode::Loopback),
            _ => Err(Self::Err::new(
                std::io::ErrorKind::Other,
                format!("Invalid run mode: {}", s),
            )),
        }
    }
}

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

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;

use crate::channel::FailureConfiguration;
use crate::Error;

/// Static parameters of one adapter, fixed at construction.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct MacConfiguration {
    /// Frame the data path; otherwise words stream through unframed.
    pub frame_mode: bool,
    /// Append and verify a CRC-64 trailer per frame.
    pub checksum: bool,
    /// Words the packet gate holds, and so the largest frame delivered.
    pub frame_buffer_depth: usize,
    /// Discard frames that fail their checks. When off the gate forwards
    /// words as they arrive and bad frames are only counted.
    pub drop_bad_frames: bool,
    /// Build in the self-test engine (generator, checker and loopback).
    pub bist_enabled: bool,
    pub ingress_capacity: usize,
    pub egress_capacity: usize,
    pub rx_capacity: usize,
    pub tx_capacity: usize,
    pub status_sync_depth: usize,
}

impl Default for MacConfiguration {
    fn default() -> Self {
        Self {
            frame_mode: true,
            checksum: true,
            frame_buffer_depth: 256,
            drop_bad_frames: true,
            bist_enabled: true,
            ingress_capacity: 32,
            egress_capacity: 32,
            rx_capacity: 64,
            tx_capacity: 64,
            status_sync_depth: 2,
        }
    }
}

impl MacConfiguration {
    pub fn validate(&self) -> Result<(), Error> {
        let capacities = [
            ("ingress queue", self.ingress_capacity),
            ("egress queue", self.egress_capacity),
            ("rx queue", self.rx_capacity),
            ("tx queue", self.tx_capacity),
            ("status transfer queue", self.status_sync_depth),
            ("frame buffer", self.frame_buffer_depth),
        ];
        match capacities.iter().find(|(_, capacity)| *capacity == 0) {
            Some((name, _)) => Err(Error::ZeroCapacity(*name)),
            None => Ok(()),
        }
    }
}

/// The simulated serial link between two adapters.
#[derive(Copy, Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LinkConfiguration {
    pub phy_frequency: usize,
    pub sys_frequency: usize,
    /// Physical cycles a word spends on the lane; at least one.
    pub latency: usize,
}

impl Default for LinkConfiguration {
    fn default() -> Self {
        Self {
            phy_frequency: 1,
            sys_frequency: 1,
            latency: 4,
        }
    }
}

impl LinkConfiguration {
    pub fn validate(&self) -> Result<(), Error> {
        if self.phy_frequency == 0 || self.sys_frequency == 0 {
            return Err(Error::InvalidConfiguration(format!(
                "frequencies must be positive (phy {}, sys {})",
                self.phy_frequency, self.sys_frequency
            )));
        }
        if self.latency == 0 {
            return Err(Error::InvalidConfiguration(
                "link latency must be at least one cycle".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything needed to set up a two adapter simulation; read from YAML.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub mac: MacConfiguration,
    pub link: LinkConfiguration,
    pub failures: FailureConfiguration,
}

impl Config {
    pub fn validate(&self) -> Result<(), Error> {
        self.mac.validate()?;
        self.link.validate()?;
        self.failures.validate()
    }

    pub fn from_file<P: AsRef<Path>>(file_name: P) -> anyhow::Result<Self> {
        let file_name = file_name.as_ref();
        let file = File::open(file_name)
            .with_context(|| format!("opening configuration {}", file_name.display()))?;
        let config: Self = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing configuration {}", file_name.display()))?;
        config.validate()?;
        Ok(config)
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(config: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(config).context("parsing configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{FaultKind, LinkFault};
    use std::io::Write;

    #[test]
    fn read_yaml_config() {
        let conf_str = r#"
mac:
  frame_mode: true
  checksum: false
  frame_buffer_depth: 16
  rx_capacity: 8
link:
  phy_frequency: 3
  sys_frequency: 2
  latency: 7
failures:
  word_corruption_rate: 0.01
  seed: 42
  link_faults:
    - start: 100
      end: 150
      kind: ChannelDown
    - start: 300
      end: 310
      kind: HardError
"#;
        let config = Config::from_str(conf_str).unwrap();
        assert!(!config.mac.checksum);
        assert_eq!(config.mac.frame_buffer_depth, 16);
        assert_eq!(config.mac.rx_capacity, 8);
        // unspecified fields keep their defaults
        assert_eq!(config.mac.tx_capacity, MacConfiguration::default().tx_capacity);
        assert_eq!(config.link.phy_frequency, 3);
        assert_eq!(config.link.latency, 7);
        assert_eq!(config.failures.seed, 42);
        assert_eq!(config.failures.soft_error_rate, 0.0);
        assert_eq!(
            config.failures.link_faults,
            vec![
                LinkFault {
                    start: 100,
                    end: 150,
                    kind: FaultKind::ChannelDown
                },
                LinkFault {
                    start: 300,
                    end: 310,
                    kind: FaultKind::HardError
                },
            ]
        );
    }

    #[test]
    fn empty_yaml_is_default() {
        let config = Config::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn rejects_invalid_values() {
        let err = Config::from_str("mac:\n  ingress_capacity: 0\n").unwrap_err();
        assert_eq!(
            err.downcast_ref::<Error>(),
            Some(&Error::ZeroCapacity("ingress queue"))
        );
        assert!(Config::from_str("link:\n  latency: 0\n").is_err());
        assert!(Config::from_str("link:\n  sys_frequency: 0\n").is_err());
        assert!(Config::from_str("failures:\n  word_corruption_rate: 1.5\n").is_err());
        assert!(Config::from_str("mac: [1, 2]").is_err());
    }

    #[test]
    fn read_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "mac:\n  bist_enabled: false\nlink:\n  latency: 2").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert!(!config.mac.bist_enabled);
        assert_eq!(config.link.latency, 2);
        assert!(Config::from_file("/nonexistent/mac.yaml").is_err());
    }

    #[test]
    fn round_trip_through_yaml() {
        let config = Config::default();
        let text = serde_yaml::to_string(&config).unwrap();
        assert_eq!(Config::from_str(&text).unwrap(), config);
    }
}

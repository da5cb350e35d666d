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

use env_logger::Target;
use std::path::PathBuf;
use structopt::StructOpt;

use aurora_mac::Config;
use macsim::{RunMode, RunOptions};

#[derive(StructOpt)]
#[structopt(name = "macsim", about = "Simulates two link adapters over a serial lane")]
struct Arguments {
    /// supported modes: Frames, Bist, Loopback
    #[structopt(short, long, default_value = "Frames")]
    mode: RunMode,
    #[structopt(short, long, default_value = "10000")]
    cycles: usize,
    /// probability a word on the lane has a bit flipped
    #[structopt(long)]
    corruption_rate: Option<f64>,
    /// BIST generator rate, 0..=31
    #[structopt(short, long, default_value = "0")]
    rate: u8,
    /// YAML configuration file
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,
    /// write a VCD trace here
    #[structopt(long, parse(from_os_str))]
    vcd: Option<PathBuf>,
    #[structopt(long, default_value = "24301")]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    let args = Arguments::from_args();

    let _logger = env_logger::builder()
        .filter(Some("macsim"), log::LevelFilter::Info)
        .filter(Some("aurora_mac"), log::LevelFilter::Warn)
        .target(Target::Stderr)
        .parse_default_env()
        .init();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let report = macsim::run(&RunOptions {
        mode: args.mode,
        cycles: args.cycles,
        config,
        corruption_rate: args.corruption_rate,
        rate: args.rate,
        vcd: args.vcd,
        seed: args.seed,
    })?;
    print!("{}", report);
    Ok(())
}

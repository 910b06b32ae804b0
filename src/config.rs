// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::fs;
use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

use crate::Cpumask;
use crate::EmulatedTopology;
use crate::Topology;

/// Request loaded from a TOML file.
///
/// ```toml
/// shape = "1:2:2"
/// available = "0,2-7"
///
/// [[cpus]]
/// id = 0
/// socket = 0
/// core = 0
/// ```
///
/// Without any `[[cpus]]` entries the host topology is used.
#[derive(Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub shape: Option<String>,
    pub available: Option<String>,
    pub cpus: Vec<CpuEntry>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct CpuEntry {
    pub id: usize,
    pub socket: usize,
    pub core: usize,
}

impl Config {
    pub fn shape(&self) -> Result<Option<EmulatedTopology>> {
        match &self.shape {
            Some(shape) => Ok(Some(shape.parse::<EmulatedTopology>()?)),
            None => Ok(None),
        }
    }

    pub fn available(&self) -> Result<Option<Cpumask>> {
        match &self.available {
            Some(list) => Ok(Some(
                Cpumask::from_cpulist(list)
                    .with_context(|| format!("Invalid available cpulist '{list}'"))?,
            )),
            None => Ok(None),
        }
    }

    /// Topology described by the `[[cpus]]` table, if any.
    pub fn topology(&self) -> Result<Option<Topology>> {
        if self.cpus.is_empty() {
            return Ok(None);
        }
        let topo = Topology::from_cpus(self.cpus.iter().map(|cpu| (cpu.id, cpu.socket, cpu.core)))
            .context("Invalid [[cpus]] topology in config")?;
        Ok(Some(topo))
    }
}

pub fn parse_config_file(filepath: &Path) -> Result<Config> {
    let file_content = fs::read_to_string(filepath)
        .with_context(|| format!("Failed to read config {}", filepath.display()))?;
    parse_config_content(&file_content)
        .with_context(|| format!("Failed to parse config {}", filepath.display()))
}

pub fn parse_config_content(file_content: &str) -> Result<Config> {
    let config: Config = toml::from_str(file_content)?;
    Ok(config)
}

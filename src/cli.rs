// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! CLI argument utilities for emulated topology assignment.
//!

use crate::Cpumask;
use crate::EmulatedTopology;
use anyhow::{bail, Context, Result};
use clap::Args;

/// Emulated topology request arguments
#[derive(Args, Debug, Clone, Default)]
pub struct EtopoArgs {
    /// Emulated topology to assign CPUs for.
    /// Format: --shape sockets:cores:threads
    ///
    /// Each emulated socket receives cores * threads CPUs. CPUs are packed
    /// so that as many groups of `threads` CPUs as possible come from a
    /// single physical core.
    ///
    /// Examples:
    ///   --shape 1:2:2    (one socket, two cores, two threads per core)
    ///   --shape 2:4:1    (two sockets, four single-threaded cores each)
    #[clap(short = 's', long)]
    pub shape: Option<EmulatedTopology>,

    /// CPUs that may be assigned, in cpulist format (e.g. "0-7,16-23").
    /// Defaults to every CPU in the topology.
    #[clap(short = 'a', long)]
    pub available: Option<String>,
}

impl EtopoArgs {
    /// Get the available CPUs as a Cpumask.
    /// Returns None if no available list was given.
    pub fn available_mask(&self) -> Result<Option<Cpumask>> {
        match &self.available {
            Some(list) => {
                let mask = Cpumask::from_cpulist(list)
                    .with_context(|| format!("Invalid --available cpulist '{list}'"))?;
                Ok(Some(mask))
            }
            None => Ok(None),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(shape) = &self.shape {
            shape.nr_cpus()?;
        }
        if let Some(mask) = self.available_mask()? {
            if mask.is_empty() {
                bail!("--available must name at least one CPU");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestOpts {
        #[clap(flatten)]
        etopo: EtopoArgs,
    }

    #[test]
    fn test_parse_args() {
        let opts = TestOpts::try_parse_from(["test", "--shape", "2:1:2", "-a", "0-3,8"]).unwrap();
        assert_eq!(opts.etopo.shape, Some(EmulatedTopology::new(2, 1, 2)));
        assert_eq!(
            opts.etopo.available_mask().unwrap().unwrap().to_cpulist(),
            "0-3,8"
        );
        opts.etopo.validate().unwrap();

        let opts = TestOpts::try_parse_from(["test"]).unwrap();
        assert_eq!(opts.etopo.shape, None);
        assert_eq!(opts.etopo.available_mask().unwrap(), None);
        opts.etopo.validate().unwrap();
    }

    #[test]
    fn test_invalid_args() {
        assert!(TestOpts::try_parse_from(["test", "--shape", "2x1x2"]).is_err());

        let opts = TestOpts::try_parse_from(["test", "-a", "3-1"]).unwrap();
        assert!(opts.etopo.validate().is_err());

        let opts = TestOpts::try_parse_from(["test", "-a", ""]).unwrap();
        assert!(opts.etopo.validate().is_err());

        let args = EtopoArgs {
            shape: Some(EmulatedTopology::new(usize::MAX, 2, 2)),
            available: None,
        };
        assert!(args.validate().is_err());
    }
}

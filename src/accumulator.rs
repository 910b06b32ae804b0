// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Running tally of a CPU request against the pool it is served from.

use crate::Cpumask;
use crate::Topology;
use crate::TopologyView;
use anyhow::bail;
use anyhow::Result;

/// Tracks how many CPUs a request still needs and which CPUs remain
/// available to it. Owned by a single assignment; not shared.
#[derive(Debug, Clone)]
pub struct CpuAccumulator {
    details: TopologyView,
    nr_needed: usize,
    result: Cpumask,
}

impl CpuAccumulator {
    /// Start a request for `nr_cpus` CPUs out of the `available` CPUs of
    /// `topo`. Available CPUs unknown to the topology are ignored.
    pub fn new(topo: &Topology, available: &Cpumask, nr_cpus: usize) -> CpuAccumulator {
        CpuAccumulator {
            details: topo.view().keep_only(available),
            nr_needed: nr_cpus,
            result: Cpumask::new(),
        }
    }

    /// The CPUs still available, with their topology.
    pub fn details(&self) -> &TopologyView {
        &self.details
    }

    pub fn nr_needed(&self) -> usize {
        self.nr_needed
    }

    /// CPUs taken so far.
    pub fn result(&self) -> &Cpumask {
        &self.result
    }

    pub fn is_satisfied(&self) -> bool {
        self.nr_needed == 0
    }

    /// True once fewer CPUs remain available than are still needed.
    pub fn is_failed(&self) -> bool {
        self.nr_needed > self.details.nr_cpus()
    }

    /// Move `cpus` from the available pool into the result.
    ///
    /// Taking CPUs that are not available, or more than are still needed, is
    /// a caller bug and is reported as an error without changing any state.
    pub fn take(&mut self, cpus: &Cpumask) -> Result<()> {
        let available = self.details.cpus();
        if !cpus.is_subset(&available) {
            bail!(
                "Cannot take cpus {} which are not all in available cpus {}",
                cpus.to_cpulist(),
                available.to_cpulist()
            );
        }

        let nr_cpus = cpus.weight();
        if nr_cpus > self.nr_needed {
            bail!(
                "Cannot take {} cpus when only {} are still needed",
                nr_cpus,
                self.nr_needed
            );
        }

        self.details = self.details.without(cpus);
        self.nr_needed -= nr_cpus;
        self.result |= cpus;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_socket_ht() -> Topology {
        Topology::from_cpus((0..8).map(|cpu| (cpu, 0, cpu % 4))).unwrap()
    }

    #[test]
    fn test_satisfied_and_failed() {
        let topo = single_socket_ht();
        let avail = Cpumask::from_cpulist("0-3").unwrap();

        let acc = CpuAccumulator::new(&topo, &avail, 0);
        assert!(acc.is_satisfied());
        assert!(!acc.is_failed());

        let acc = CpuAccumulator::new(&topo, &avail, 4);
        assert!(!acc.is_satisfied());
        assert!(!acc.is_failed());

        let acc = CpuAccumulator::new(&topo, &avail, 5);
        assert!(acc.is_failed());

        // CPUs outside the topology don't count towards the pool.
        let avail = Cpumask::from_cpulist("0-3,64-127").unwrap();
        let acc = CpuAccumulator::new(&topo, &avail, 5);
        assert!(acc.is_failed());
    }

    #[test]
    fn test_take() {
        let topo = single_socket_ht();
        let avail = Cpumask::from_cpulist("0-7").unwrap();
        let mut acc = CpuAccumulator::new(&topo, &avail, 4);

        acc.take(&Cpumask::from_cpulist("0,4").unwrap()).unwrap();
        assert_eq!(acc.nr_needed(), 2);
        assert_eq!(acc.details().cpus().to_cpulist(), "1-3,5-7");
        assert!(!acc.is_satisfied());

        acc.take(&Cpumask::from_cpulist("1,5").unwrap()).unwrap();
        assert!(acc.is_satisfied());
        assert_eq!(acc.result().to_cpulist(), "0-1,4-5");
    }

    #[test]
    fn test_take_rejects_bad_cpus() {
        let topo = single_socket_ht();
        let avail = Cpumask::from_cpulist("0-3").unwrap();
        let mut acc = CpuAccumulator::new(&topo, &avail, 2);

        // Not available.
        assert!(acc.take(&Cpumask::from_cpulist("4").unwrap()).is_err());
        // More than needed.
        assert!(acc.take(&Cpumask::from_cpulist("0-2").unwrap()).is_err());
        assert_eq!(acc.nr_needed(), 2);
        assert_eq!(acc.details().nr_cpus(), 4);

        acc.take(&Cpumask::from_cpulist("0").unwrap()).unwrap();
        // Already taken.
        assert!(acc.take(&Cpumask::from_cpulist("0").unwrap()).is_err());
    }
}

// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Emulated topology assignment
//!
//! Map an emulated `sockets:cores:threads` topology onto the physical CPUs
//! that are currently available.
//!
//! The assignment is built greedily, one step at a time:
//!
//! 1. Pick the emulated socket that still needs the most CPUs, lowest index
//!    on ties.
//! 2. Round its outstanding demand down to whole groups of `threads` CPUs,
//!    unless it is already no bigger than one group.
//! 3. Collect candidate physical sockets with `find_sockets()`: every socket
//!    that fits the rounded demand, or failing that the roomiest ones.
//! 4. Score each candidate with `eval_socket()` and keep the one forming the
//!    most complete groups, then the one left with the most free CPUs. A
//!    remaining tie keeps the lowest socket ID.
//! 5. Hand the winner's CPUs to the emulated socket and repeat until the
//!    whole request is satisfied.
//!
//! Within an emulated socket, CPUs are kept in the order they were picked and
//! the final sequence concatenates emulated sockets in index order.
//!
//!```
//!     use scx_etopo::{take_by_etopology, Cpumask, Topology};
//!     // One socket, core c = {c, c + 4}.
//!     let topo = Topology::from_cpus((0..8).map(|cpu| (cpu, 0, cpu % 4))).unwrap();
//!     let avail = Cpumask::from_cpulist("0,2-7").unwrap();
//!     let cpus = take_by_etopology(&topo, &avail, 1, 2, 2).unwrap();
//!     assert_eq!(cpus, vec![0, 4, 2, 6]);
//!```

use crate::candidates::find_sockets;
use crate::eval::eval_socket;
use crate::eval::SocketEvaluation;
use crate::CpuAccumulator;
use crate::Cpumask;
use crate::EtopoError;
use crate::Topology;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;
use sscanf::sscanf;
use std::fmt;
use std::str::FromStr;
use tracing::debug;
use tracing::trace;

/// Requested shape: `sockets` emulated sockets, each with `cores` cores of
/// `threads` hardware threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulatedTopology {
    pub sockets: usize,
    pub cores: usize,
    pub threads: usize,
}

impl EmulatedTopology {
    pub fn new(sockets: usize, cores: usize, threads: usize) -> Self {
        Self {
            sockets,
            cores,
            threads,
        }
    }

    /// CPUs owed to each emulated socket.
    pub fn cpus_per_socket(&self) -> Result<usize> {
        match self.cores.checked_mul(self.threads) {
            Some(nr_cpus) => Ok(nr_cpus),
            None => Err(EtopoError::InvalidShape(format!("{self} overflows")).into()),
        }
    }

    /// Total number of CPUs requested.
    pub fn nr_cpus(&self) -> Result<usize> {
        match self.cpus_per_socket()?.checked_mul(self.sockets) {
            Some(nr_cpus) => Ok(nr_cpus),
            None => Err(EtopoError::InvalidShape(format!("{self} overflows")).into()),
        }
    }
}

impl FromStr for EmulatedTopology {
    type Err = EtopoError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match sscanf!(s.trim(), "{usize}:{usize}:{usize}") {
            Ok((sockets, cores, threads)) => Ok(Self::new(sockets, cores, threads)),
            Err(_) => Err(EtopoError::InvalidShape(format!(
                "'{}' is not of the form sockets:cores:threads",
                s.trim()
            ))),
        }
    }
}

impl fmt::Display for EmulatedTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.sockets, self.cores, self.threads)
    }
}

/// CPUs handed to each emulated socket, in the order they were picked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Assignment {
    shape: EmulatedTopology,
    sockets: Vec<Vec<usize>>,
}

impl Assignment {
    pub fn shape(&self) -> EmulatedTopology {
        self.shape
    }

    /// Per emulated socket CPU sequences, indexed by emulated socket.
    pub fn sockets(&self) -> &[Vec<usize>] {
        &self.sockets
    }

    pub fn socket(&self, esocket: usize) -> Option<&[usize]> {
        self.sockets.get(esocket).map(|cpus| cpus.as_slice())
    }

    /// All CPUs, emulated socket 0 first.
    pub fn cpus(&self) -> Vec<usize> {
        self.sockets.iter().flatten().copied().collect()
    }

    pub fn into_cpus(self) -> Vec<usize> {
        self.sockets.into_iter().flatten().collect()
    }

    pub fn nr_cpus(&self) -> usize {
        self.sockets.iter().map(|cpus| cpus.len()).sum()
    }

    /// The assigned CPUs as an unordered set.
    pub fn cpumask(&self) -> Cpumask {
        let mut mask = Cpumask::new();
        for cpu in self.sockets.iter().flatten() {
            // Every CPU came out of a Topology, so it is in range.
            let _ = mask.set_cpu(*cpu);
        }
        mask
    }
}

/// Per assignment state: the shared CPU pool plus what each emulated socket
/// is still owed and has received.
struct EtopoAccumulator {
    acc: CpuAccumulator,
    threads: usize,
    residual: Vec<usize>,
    assignment: Assignment,
}

impl EtopoAccumulator {
    fn new(topo: &Topology, available: &Cpumask, shape: EmulatedTopology) -> Result<Self> {
        let nr_cpus = shape.nr_cpus()?;
        let per_socket = shape.cpus_per_socket()?;
        Ok(Self {
            acc: CpuAccumulator::new(topo, available, nr_cpus),
            threads: shape.threads,
            residual: vec![per_socket; shape.sockets],
            assignment: Assignment {
                shape,
                sockets: vec![vec![]; shape.sockets],
            },
        })
    }

    /// Emulated socket with the largest outstanding demand, lowest index on
    /// ties.
    fn hungriest_socket(&self) -> Option<(usize, usize)> {
        let mut max: Option<(usize, usize)> = None;
        for (esocket, &nr_cpus) in self.residual.iter().enumerate() {
            match max {
                Some((_, max_cpus)) if max_cpus >= nr_cpus => {}
                _ => max = Some((esocket, nr_cpus)),
            }
        }
        max
    }

    fn add(&mut self, esocket: usize, cpus: Vec<usize>) -> Result<()> {
        self.acc.take(&Cpumask::from_cpus(cpus.iter().copied())?)?;
        self.residual[esocket] -= cpus.len();
        self.assignment.sockets[esocket].extend(cpus);
        Ok(())
    }

    fn insufficient(&self) -> anyhow::Error {
        EtopoError::InsufficientCpus {
            needed: self.acc.nr_needed(),
            available: self.acc.details().nr_cpus(),
        }
        .into()
    }
}

/// Assign CPUs from `available` on `topo` to the emulated topology `shape`.
///
/// Fails with `EtopoError::InsufficientCpus` when the available CPUs cannot
/// cover the request. No partial assignment is returned.
pub fn assign(topo: &Topology, available: &Cpumask, shape: EmulatedTopology) -> Result<Assignment> {
    let mut acc = EtopoAccumulator::new(topo, available, shape)?;
    if acc.acc.is_satisfied() {
        return Ok(acc.assignment);
    }
    if acc.acc.is_failed() {
        return Err(acc.insufficient());
    }

    debug!(
        "assigning {} cpus for emulated topology {} from {}",
        acc.acc.nr_needed(),
        shape,
        acc.acc.details().cpus().to_cpulist()
    );

    loop {
        // The entry check should make this unreachable, don't spin if the
        // topology turns out to be inconsistent.
        if acc.acc.is_failed() {
            return Err(acc.insufficient());
        }

        let (esocket, residual) = match acc.hungriest_socket() {
            Some(hungriest) => hungriest,
            None => return Err(acc.insufficient()),
        };
        let mut nr_cpus = residual;
        if nr_cpus > acc.threads {
            nr_cpus -= nr_cpus % acc.threads;
        }

        let candidates = find_sockets(&acc.acc.details().free_cpus_per_socket(), nr_cpus);
        trace!(
            "esocket {} needs {} (searching {}), candidates {:?}",
            esocket,
            residual,
            nr_cpus,
            candidates
        );

        let mut best: Option<(usize, SocketEvaluation)> = None;
        for socket in candidates {
            let eval = eval_socket(acc.acc.details(), socket, nr_cpus, acc.threads);
            trace!(
                "socket {}: cpus {:?} groups {} free {}",
                socket,
                eval.cpus,
                eval.groups,
                eval.free
            );
            let better = match &best {
                Some((_, best_eval)) => eval.is_better_than(best_eval),
                None => true,
            };
            if better {
                best = Some((socket, eval));
            }
        }

        let (socket, eval) = match best {
            Some((socket, eval)) if !eval.cpus.is_empty() => (socket, eval),
            _ => return Err(acc.insufficient()),
        };

        debug!(
            "esocket {} <- socket {} cpus {:?} ({} groups)",
            esocket, socket, eval.cpus, eval.groups
        );
        acc.add(esocket, eval.cpus)?;
        if acc.acc.is_satisfied() {
            break;
        }
    }

    Ok(acc.assignment)
}

/// Assign CPUs for a `sockets:cores:threads` emulated topology and return
/// them as a single sequence, emulated socket 0 first.
pub fn take_by_etopology(
    topo: &Topology,
    available: &Cpumask,
    sockets: usize,
    cores: usize,
    threads: usize,
) -> Result<Vec<usize>> {
    let shape = EmulatedTopology::new(sockets, cores, threads);
    Ok(assign(topo, available, shape)?.into_cpus())
}

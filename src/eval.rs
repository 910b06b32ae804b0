// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Scoring how well a single physical socket could serve a CPU request.
//!
//! A socket is filled greedily, most-free core first, taking at most one
//! group of SMT siblings from a core per step. The result records how many of
//! those steps produced a *complete* group and how much room the socket would
//! have left, which is what the emulated topology scheduler ranks sockets by.

use crate::Cpumask;
use crate::TopologyView;
use tracing::trace;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocketEvaluation {
    /// CPUs the socket would contribute, in the order they were picked.
    pub cpus: Vec<usize>,
    /// Number of complete groups of `group_size` siblings among `cpus`.
    pub groups: usize,
    /// CPUs left in the socket after removing `cpus`.
    pub free: usize,
}

impl SocketEvaluation {
    /// More complete groups win, then more CPUs left free. Anything else is
    /// not an improvement.
    pub fn is_better_than(&self, other: &SocketEvaluation) -> bool {
        self.groups > other.groups || (self.groups == other.groups && self.free > other.free)
    }
}

/// Next core of `socket` to fill: the one with the most CPUs left in
/// `details`, lowest core ID on ties.
pub fn next_core(details: &TopologyView, socket: usize) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for core in details.cores_in_socket(socket) {
        let nr_cpus = details.cpus_in_core(core).weight();
        match best {
            Some((_, best_nr_cpus)) if best_nr_cpus >= nr_cpus => {}
            _ => best = Some((core, nr_cpus)),
        }
    }
    best.map(|(core, _)| core)
}

/// Evaluate taking up to `needed` CPUs from `socket`, in groups of at most
/// `group_size` siblings per core.
///
/// `details` is not modified; the evaluation works on its own copy.
pub fn eval_socket(
    details: &TopologyView,
    socket: usize,
    mut needed: usize,
    group_size: usize,
) -> SocketEvaluation {
    let mut details = details.clone();
    let mut cpus = vec![];
    let mut groups = 0;

    if group_size == 0 {
        return SocketEvaluation {
            cpus,
            groups,
            free: details.cpus_in_socket(socket).weight(),
        };
    }

    while needed > 0 {
        let core = match next_core(&details, socket) {
            Some(core) => core,
            None => break,
        };

        let mut taken = Cpumask::new();
        let mut nr_taken = 0;
        for cpu in details.cpus_in_core(core).iter() {
            if needed == 0 || nr_taken == group_size {
                break;
            }
            let _ = taken.set_cpu(cpu);
            cpus.push(cpu);
            nr_taken += 1;
            needed -= 1;
        }
        if nr_taken == group_size {
            groups += 1;
        }

        trace!("socket {} core {} -> cpus {}", socket, core, taken.to_cpulist());
        details = details.without(&taken);
    }

    SocketEvaluation {
        cpus,
        groups,
        free: details.cpus_in_socket(socket).weight(),
    }
}

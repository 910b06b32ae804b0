// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::collections::BTreeMap;

/// Pick the physical sockets worth evaluating for a request of `nr_cpus`.
///
/// `free` maps socket ID to the number of CPUs it still has available. If
/// any socket can serve the whole request, all such sockets are returned.
/// Otherwise the sockets with the most free CPUs are returned. Either way the
/// result is in ascending socket ID order, and sockets without a single free
/// CPU are never included.
pub fn find_sockets(free: &BTreeMap<usize, usize>, nr_cpus: usize) -> Vec<usize> {
    let mut more_or_equal = vec![];
    let mut less = vec![];
    let mut max_less = 0;

    // BTreeMap iteration keeps both lists sorted by socket ID.
    for (&socket, &nr_free) in free.iter() {
        if nr_free == 0 {
            continue;
        }
        if nr_free >= nr_cpus {
            more_or_equal.push(socket);
        } else if nr_free > max_less {
            less = vec![socket];
            max_less = nr_free;
        } else if nr_free == max_less {
            less.push(socket);
        }
    }

    if !more_or_equal.is_empty() {
        more_or_equal
    } else {
        less
    }
}

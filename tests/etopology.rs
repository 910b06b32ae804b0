use std::collections::BTreeSet;

use scx_etopo::{assign, take_by_etopology, Cpumask, EmulatedTopology, EtopoError, Topology};

// One socket, four cores of two threads. Core c = {c, c+4}.
fn single_socket_ht() -> Topology {
    Topology::from_cpus((0..8).map(|cpu| (cpu, 0, cpu % 4))).unwrap()
}

// Two sockets, three cores of two threads each. Even CPUs on socket 0, odd
// CPUs on socket 1, core c = {c, c+6}.
fn dual_socket_ht() -> Topology {
    Topology::from_cpus((0..12).map(|cpu| (cpu, cpu % 2, cpu % 6))).unwrap()
}

fn mask(cpulist: &str) -> Cpumask {
    Cpumask::from_cpulist(cpulist).unwrap()
}

struct TestCase {
    description: &'static str,
    topo: fn() -> Topology,
    available: &'static str,
    shape: (usize, usize, usize),
    expected: &'static [usize],
}

const CASES: &[TestCase] = &[
    TestCase {
        description: "single socket HT, 1:2:2, socket free",
        topo: single_socket_ht,
        available: "0-7",
        shape: (1, 2, 2),
        expected: &[0, 4, 1, 5],
    },
    TestCase {
        description: "single socket HT, 1:2:2, socket minus one cpu",
        topo: single_socket_ht,
        available: "0,2-7",
        shape: (1, 2, 2),
        expected: &[0, 4, 2, 6],
    },
    TestCase {
        description: "single socket HT, 1:2:1, socket minus one cpu",
        topo: single_socket_ht,
        available: "0,2-7",
        shape: (1, 2, 1),
        expected: &[0, 2],
    },
    TestCase {
        description: "single socket HT, 1:2:2, one full core and two partial cores",
        topo: single_socket_ht,
        available: "2,5-7",
        shape: (1, 2, 2),
        expected: &[2, 6, 5, 7],
    },
    TestCase {
        description: "dual socket HT, 1:2:2, full sockets",
        topo: dual_socket_ht,
        available: "0-11",
        shape: (1, 2, 2),
        expected: &[0, 6, 2, 8],
    },
    TestCase {
        description: "dual socket HT, 1:2:2, second socket supports more groups",
        topo: dual_socket_ht,
        available: "2-5,8,9,11",
        shape: (1, 2, 2),
        expected: &[3, 9, 5, 11],
    },
    TestCase {
        description: "dual socket HT, 1:2:2, both fit, second socket supports more groups",
        topo: dual_socket_ht,
        available: "0,3-5,8-11",
        shape: (1, 2, 2),
        expected: &[3, 9, 5, 11],
    },
    TestCase {
        description: "dual socket HT, 2:1:2, second socket is more free",
        topo: dual_socket_ht,
        available: "2-5,8,9,11",
        shape: (2, 1, 2),
        expected: &[3, 9, 2, 8],
    },
    TestCase {
        description: "dual socket HT, 1:1:2, same groups, second socket is more free",
        topo: dual_socket_ht,
        available: "1-11",
        shape: (1, 1, 2),
        expected: &[1, 7],
    },
    TestCase {
        description: "dual socket HT, 1:1:2, second socket has more groups and fewer cpus",
        topo: dual_socket_ht,
        available: "0,4,5,8,11",
        shape: (1, 1, 2),
        expected: &[5, 11],
    },
    TestCase {
        description: "dual socket HT, 2:2:2, exact match",
        topo: dual_socket_ht,
        available: "0,3-6,9-11",
        shape: (2, 2, 2),
        expected: &[0, 6, 4, 10, 3, 9, 5, 11],
    },
    TestCase {
        description: "dual socket HT, 2:2:2, not an exact match",
        topo: dual_socket_ht,
        available: "0,1,4-6,9-11",
        shape: (2, 2, 2),
        expected: &[0, 6, 4, 10, 5, 11, 1, 9],
    },
    TestCase {
        description: "dual socket HT, 2:1:2, both emulated sockets on the first socket",
        topo: dual_socket_ht,
        available: "0,1,3-6,10",
        shape: (2, 1, 2),
        expected: &[0, 6, 4, 10],
    },
    TestCase {
        description: "dual socket HT, 2:1:2, emulated socket is split",
        topo: dual_socket_ht,
        available: "0,2,8,11",
        shape: (2, 1, 2),
        expected: &[2, 8, 0, 11],
    },
];

#[test]
fn assignment_table() {
    for tc in CASES {
        let topo = (tc.topo)();
        let (sockets, cores, threads) = tc.shape;
        let result = take_by_etopology(&topo, &mask(tc.available), sockets, cores, threads)
            .unwrap_or_else(|e| panic!("\"{}\" failed: {:#}", tc.description, e));
        assert_eq!(
            result, tc.expected,
            "unexpected result in test \"{}\"",
            tc.description
        );
    }
}

#[test]
fn conservation() {
    // Every subset of the dual socket topology, every shape that fits.
    let topo = dual_socket_ht();
    let shapes = [
        (1, 1, 1),
        (1, 1, 2),
        (2, 1, 2),
        (1, 2, 2),
        (1, 3, 1),
        (3, 1, 2),
        (2, 2, 2),
        (1, 1, 3),
    ];
    for bits in 0u32..(1 << 12) {
        let avail = Cpumask::from_cpus((0..12).filter(|cpu| bits & (1 << cpu) != 0)).unwrap();
        for &(sockets, cores, threads) in shapes.iter() {
            let nr_cpus = sockets * cores * threads;
            let result = take_by_etopology(&topo, &avail, sockets, cores, threads);
            if avail.weight() < nr_cpus {
                assert!(result.is_err());
                continue;
            }
            let cpus = result.unwrap();
            assert_eq!(
                cpus.len(),
                nr_cpus,
                "avail {} shape {sockets}:{cores}:{threads}",
                avail.to_cpulist()
            );
            let unique: BTreeSet<usize> = cpus.iter().copied().collect();
            assert_eq!(unique.len(), nr_cpus);
            assert!(cpus.iter().all(|cpu| avail.test_cpu(*cpu)));
        }
    }
}

#[test]
fn per_socket_counts() {
    let topo = dual_socket_ht();
    let assignment = assign(&topo, &mask("0-11"), EmulatedTopology::new(3, 2, 2)).unwrap();
    assert_eq!(assignment.sockets().len(), 3);
    for cpus in assignment.sockets() {
        assert_eq!(cpus.len(), 4);
    }
}

#[test]
fn infeasible() {
    let topo = dual_socket_ht();
    let cases = [
        ("0-2", (1, 2, 2)),
        ("", (1, 1, 1)),
        ("0-10", (3, 2, 2)),
        ("1-11", (2, 3, 2)),
    ];
    for (avail, shape) in cases {
        let (sockets, cores, threads) = shape;
        let err = take_by_etopology(&topo, &mask(avail), sockets, cores, threads).unwrap_err();
        match err.downcast_ref::<EtopoError>() {
            Some(EtopoError::InsufficientCpus { needed, available }) => {
                assert_eq!(*needed, sockets * cores * threads);
                assert_eq!(*available, mask(avail).weight());
            }
            other => panic!("unexpected error {:?} for {}", other, avail),
        }
    }
}

#[test]
fn deterministic() {
    let topo = dual_socket_ht();
    let avail = mask("0,1,3-6,9-11");
    let first = take_by_etopology(&topo, &avail, 2, 2, 2).unwrap();
    for _ in 0..16 {
        assert_eq!(take_by_etopology(&topo, &avail, 2, 2, 2).unwrap(), first);
    }

    // Building the same topology in a different order changes nothing.
    let shuffled = Topology::from_cpus((0..12).rev().map(|cpu| (cpu, cpu % 2, cpu % 6))).unwrap();
    assert_eq!(take_by_etopology(&shuffled, &avail, 2, 2, 2).unwrap(), first);
}

#[test]
fn prefers_less_fragmented_socket() {
    // Both sockets have four free CPUs. Socket 0's are spread over four
    // cores, socket 1's form two whole cores.
    let topo = Topology::from_cpus((0..16).map(|cpu| (cpu, cpu / 8, cpu % 8 / 2 + (cpu / 8) * 4)))
        .unwrap();
    let avail = mask("0,2,4,6,8-11");
    let cpus = take_by_etopology(&topo, &avail, 1, 2, 2).unwrap();
    assert_eq!(cpus, vec![8, 9, 10, 11]);

    // With a single group requested, the whole core still wins.
    let cpus = take_by_etopology(&topo, &avail, 1, 1, 2).unwrap();
    assert_eq!(cpus, vec![8, 9]);
}

#[test]
fn uneven_sockets() {
    // Socket 0 has one core, socket 1 has three.
    let topo = Topology::from_cpus([
        (0, 0, 0),
        (1, 0, 0),
        (2, 1, 2),
        (3, 1, 2),
        (4, 1, 4),
        (5, 1, 4),
        (6, 1, 6),
        (7, 1, 6),
    ])
    .unwrap();
    let assignment = assign(&topo, &topo.span(), EmulatedTopology::new(2, 2, 2)).unwrap();
    assert_eq!(assignment.socket(0), Some(&[2, 3, 4, 5][..]));
    // Neither socket fits the second emulated socket; both tie on groups and
    // free CPUs, so the lowest socket ID is drained first.
    assert_eq!(assignment.socket(1), Some(&[0, 1, 6, 7][..]));
}

#[test]
fn json_output() {
    let topo = single_socket_ht();
    let assignment = assign(&topo, &topo.span(), EmulatedTopology::new(2, 1, 2)).unwrap();
    let json = serde_json::to_value(&assignment).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "shape": { "sockets": 2, "cores": 1, "threads": 2 },
            "sockets": [[0, 4], [1, 5]],
        })
    );
}

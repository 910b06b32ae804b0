// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Emulated topology CPU assignment
//!
//! Workloads such as VMs often want to see a specific topology: so many
//! sockets, each with so many cores of so many hardware threads. This crate
//! picks the physical CPUs backing such an emulated topology out of a pool of
//! available CPUs, keeping SMT siblings of an emulated core on the same
//! physical core and emulated sockets on as few physical sockets as it can.
//!
//! The utilities can be put into three broad categories.
//!
//! ## Topology Modeling
//!
//! `Cpumask` and `Topology` describe CPU sets and the physical socket / core /
//! thread hierarchy, either read from sysfs or built by hand. `TopologyView`
//! answers membership queries over a subset of the CPUs.
//!
//! ## Assignment
//!
//! `assign()` and `take_by_etopology()` run the placement. `eval_socket()` and
//! `find_sockets()` are the scoring and candidate selection steps it is built
//! from, and `CpuAccumulator` tracks the request against the pool.
//!
//! ## Command Line Support
//!
//! `EtopoArgs` and `Config` parse requests from the command line and from TOML
//! files for the `scx_etopo` binary.

mod cpumask;
pub use cpumask::read_cpulist;
pub use cpumask::Cpumask;
pub use cpumask::MAX_CPUS;

mod topology;
pub use topology::Core;
pub use topology::Cpu;
pub use topology::Socket;
pub use topology::Topology;
pub use topology::TopologyView;
pub use topology::SYSFS_CPU_ROOT;

mod error;
pub use error::EtopoError;

mod accumulator;
pub use accumulator::CpuAccumulator;

mod eval;
pub use eval::eval_socket;
pub use eval::next_core;
pub use eval::SocketEvaluation;

mod candidates;
pub use candidates::find_sockets;

mod etopology;
pub use etopology::assign;
pub use etopology::take_by_etopology;
pub use etopology::Assignment;
pub use etopology::EmulatedTopology;

pub mod cli;

pub mod config;

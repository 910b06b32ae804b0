// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Topology
//!
//! Model the physical CPU topology that emulated topologies are mapped onto.
//!
//! A Topology is comprised of one or more Socket objects, which themselves
//! are comprised hierarchically of Core -> Cpu objects respectively:
//!
//!```text
//!                                   Topology
//!                                      |
//!                   o------------------o------------------o
//!                   |                                     |
//!   o---------------o-------------o       o---------------o-------------o
//!   |         Socket              |  ...  |         Socket              |
//!   | ID      0                   |       | ID      1                   |
//!   | Cores   <id, Core>          |       | Cores   <id, Core>          |
//!   | Span    0x555               |       | Span    0xaaa               |
//!   o-----------------------------o       o-----------------------------o
//!                   |
//!   o---------------o-------------o  ...  o-----------------------------o
//!   |          Core               |       |          Core               |
//!   | ID    0                     |       | ID    4                     |
//!   | Cpus  <id, Cpu>             |       | Cpus  <id, Cpu>             |
//!   | Span  0x041                 |       | Span  0x410                 |
//!   o-----------------------------o       o-----------------------------o
//!```
//!
//! Every object contains a Cpumask that spans all CPUs in that point in the
//! topological hierarchy. Core IDs are unique across the whole host, not just
//! within their socket.
//!
//! Creating Topology
//! -----------------
//!
//! The host topology is read from sysfs with `Topology::new()`. Synthetic
//! topologies are built from `(cpu, socket, core)` triples:
//!
//!```
//!     use scx_etopo::Topology;
//!     // One socket, two cores with two hardware threads each.
//!     let topo = Topology::from_cpus([(0, 0, 0), (1, 0, 1), (2, 0, 0), (3, 0, 1)]).unwrap();
//!     assert_eq!(topo.nr_cpus(), 4);
//!```
//!
//! Querying Topology
//! -----------------
//!
//! All objects in the topological hierarchy are read-only. Placement code
//! works on a `TopologyView`, a flat CPU -> (socket, core) map which can be
//! reduced to a subset of CPUs without touching the Topology it came from.

use crate::cpumask::read_cpulist;
use crate::Cpumask;
use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use glob::glob;
use sscanf::sscanf;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

/// Default sysfs directory describing the host CPUs.
pub const SYSFS_CPU_ROOT: &str = "/sys/devices/system/cpu";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cpu {
    id: usize,
    core_id: usize,
    socket_id: usize,
}

impl Cpu {
    /// Get the ID of this Cpu
    pub fn id(&self) -> usize {
        self.id
    }

    /// Get the ID of the Core this Cpu belongs to
    pub fn core_id(&self) -> usize {
        self.core_id
    }

    /// Get the ID of the Socket this Cpu belongs to
    pub fn socket_id(&self) -> usize {
        self.socket_id
    }
}

#[derive(Debug, Clone)]
pub struct Core {
    id: usize,
    socket_id: usize,
    cpus: BTreeMap<usize, Cpu>,
    span: Cpumask,
}

impl Core {
    /// Get the ID of this Core
    pub fn id(&self) -> usize {
        self.id
    }

    /// Get the ID of the Socket this Core belongs to
    pub fn socket_id(&self) -> usize {
        self.socket_id
    }

    /// Get the map of CPUs inside this Core
    pub fn cpus(&self) -> &BTreeMap<usize, Cpu> {
        &self.cpus
    }

    /// Get a Cpumask of all SMT siblings in this Core
    pub fn span(&self) -> Cpumask {
        self.span.clone()
    }
}

#[derive(Debug, Clone)]
pub struct Socket {
    id: usize,
    cores: BTreeMap<usize, Core>,
    span: Cpumask,
}

impl Socket {
    /// Get the ID of this Socket
    pub fn id(&self) -> usize {
        self.id
    }

    /// Get the map of cores inside this Socket
    pub fn cores(&self) -> &BTreeMap<usize, Core> {
        &self.cores
    }

    /// Get a Cpumask of all CPUs in this Socket
    pub fn span(&self) -> Cpumask {
        self.span.clone()
    }
}

#[derive(Debug, Clone)]
pub struct Topology {
    sockets: BTreeMap<usize, Socket>,
    cpus: BTreeMap<usize, Cpu>,
    span: Cpumask,
}

impl Topology {
    /// Build a complete host Topology from sysfs.
    pub fn new() -> Result<Topology> {
        Self::from_sysfs(Path::new(SYSFS_CPU_ROOT))
    }

    /// Build a Topology from a sysfs-style CPU directory, e.g.
    /// /sys/devices/system/cpu.
    pub fn from_sysfs(root: &Path) -> Result<Topology> {
        let cpus = read_sysfs_cpus(root)?;
        let topo = Self::from_cpus(cpus)
            .with_context(|| format!("Failed to build topology from {}", root.display()))?;
        debug!(
            "topology from {}: {} sockets, {} cpus",
            root.display(),
            topo.sockets.len(),
            topo.nr_cpus()
        );
        Ok(topo)
    }

    /// Build a Topology from `(cpu, socket, core)` triples.
    pub fn from_cpus<I>(cpus: I) -> Result<Topology>
    where
        I: IntoIterator<Item = (usize, usize, usize)>,
    {
        let mut sockets: BTreeMap<usize, Socket> = BTreeMap::new();
        let mut all_cpus = BTreeMap::new();
        let mut core_to_socket: BTreeMap<usize, usize> = BTreeMap::new();
        let mut span = Cpumask::new();

        for (cpu_id, socket_id, core_id) in cpus {
            if all_cpus.contains_key(&cpu_id) {
                bail!("Found duplicate CPU ID {}", cpu_id);
            }
            let owner = *core_to_socket.entry(core_id).or_insert(socket_id);
            if owner != socket_id {
                bail!(
                    "Core {} of CPU {} is in both socket {} and socket {}",
                    core_id,
                    cpu_id,
                    owner,
                    socket_id
                );
            }

            let cpu = Cpu {
                id: cpu_id,
                core_id,
                socket_id,
            };

            let socket = sockets.entry(socket_id).or_insert_with(|| Socket {
                id: socket_id,
                cores: BTreeMap::new(),
                span: Cpumask::new(),
            });
            let core = socket.cores.entry(core_id).or_insert_with(|| Core {
                id: core_id,
                socket_id,
                cpus: BTreeMap::new(),
                span: Cpumask::new(),
            });

            // Update all of the devices' spans to include this CPU.
            span.set_cpu(cpu_id)?;
            socket.span.set_cpu(cpu_id)?;
            core.span.set_cpu(cpu_id)?;
            core.cpus.insert(cpu_id, cpu.clone());
            all_cpus.insert(cpu_id, cpu);
        }

        Ok(Topology {
            sockets,
            cpus: all_cpus,
            span,
        })
    }

    /// Get the map of Sockets on the host.
    pub fn sockets(&self) -> &BTreeMap<usize, Socket> {
        &self.sockets
    }

    /// Get a map of <CPU ID, Cpu> for all Cpus on the host.
    pub fn cpus(&self) -> &BTreeMap<usize, Cpu> {
        &self.cpus
    }

    /// Get the number of total CPUs on the host
    pub fn nr_cpus(&self) -> usize {
        self.cpus.len()
    }

    /// Get a cpumask of all the CPUs in the topology
    pub fn span(&self) -> Cpumask {
        self.span.clone()
    }

    /// Get a queryable view over every CPU in the topology.
    pub fn view(&self) -> TopologyView {
        TopologyView {
            cpus: self.cpus.clone(),
        }
    }
}

/// Flat, reducible CPU -> (socket, core) view of a Topology.
///
/// Every query returns ids in ascending order, which is what makes placement
/// decisions built on top of it deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyView {
    cpus: BTreeMap<usize, Cpu>,
}

impl TopologyView {
    fn mask_of<'a>(cpus: impl Iterator<Item = &'a Cpu>) -> Cpumask {
        let mut mask = Cpumask::new();
        for cpu in cpus {
            // Ids were range checked when the Topology was built.
            let _ = mask.set_cpu(cpu.id);
        }
        mask
    }

    /// Return a copy restricted to the CPUs in `mask`.
    pub fn keep_only(&self, mask: &Cpumask) -> TopologyView {
        TopologyView {
            cpus: self
                .cpus
                .iter()
                .filter(|(id, _)| mask.test_cpu(**id))
                .map(|(id, cpu)| (*id, cpu.clone()))
                .collect(),
        }
    }

    /// Return a copy with the CPUs in `mask` removed.
    pub fn without(&self, mask: &Cpumask) -> TopologyView {
        self.keep_only(&self.cpus().and_not(mask))
    }

    pub fn nr_cpus(&self) -> usize {
        self.cpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }

    /// Sockets which still have at least one CPU in this view.
    pub fn sockets(&self) -> Vec<usize> {
        self.cpus
            .values()
            .map(|cpu| cpu.socket_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Cores of `socket` which still have at least one CPU in this view.
    pub fn cores_in_socket(&self, socket: usize) -> Vec<usize> {
        self.cpus
            .values()
            .filter(|cpu| cpu.socket_id == socket)
            .map(|cpu| cpu.core_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn cpus(&self) -> Cpumask {
        Self::mask_of(self.cpus.values())
    }

    pub fn cpus_in_socket(&self, socket: usize) -> Cpumask {
        Self::mask_of(self.cpus.values().filter(|cpu| cpu.socket_id == socket))
    }

    pub fn cpus_in_core(&self, core: usize) -> Cpumask {
        Self::mask_of(self.cpus.values().filter(|cpu| cpu.core_id == core))
    }

    /// Number of CPUs left in each socket. Sockets with none are omitted.
    pub fn free_cpus_per_socket(&self) -> BTreeMap<usize, usize> {
        let mut free = BTreeMap::new();
        for cpu in self.cpus.values() {
            *free.entry(cpu.socket_id).or_insert(0) += 1;
        }
        free
    }
}

/*********************************************
 * Helper functions for reading the Topology *
 *********************************************/

fn read_file_usize(path: &Path) -> Result<usize> {
    let val = match std::fs::read_to_string(path) {
        Ok(val) => val,
        Err(_) => {
            bail!("Failed to open or read file {:?}", path);
        }
    };

    match val.trim().parse::<usize>() {
        Ok(parsed) => Ok(parsed),
        Err(_) => {
            bail!("Failed to parse {}", val);
        }
    }
}

fn read_sysfs_cpus(root: &Path) -> Result<Vec<(usize, usize, usize)>> {
    // Offline CPUs have no topology directory, skip them when we can tell.
    let online = match std::fs::read_to_string(root.join("online")) {
        Ok(list) => Some(Cpumask::from_cpulist(&list)?),
        Err(_) => None,
    };

    let mut cpus = Vec::new();
    let cpu_pattern = root.join("cpu[0-9]*");
    let cpu_paths = glob(cpu_pattern.to_string_lossy().as_ref())?;
    for cpu_path in cpu_paths.filter_map(Result::ok) {
        let cpu_str = match cpu_path.file_name().and_then(|name| name.to_str()) {
            Some(name) => name,
            None => continue,
        };
        let cpu_id = match sscanf!(cpu_str, "cpu{usize}") {
            Ok(val) => val,
            Err(_) => {
                bail!("Failed to parse cpu ID {}", cpu_str);
            }
        };

        if let Some(online) = &online {
            if !online.test_cpu(cpu_id) {
                continue;
            }
        }

        let top_path = cpu_path.join("topology");
        let socket_id = read_file_usize(&top_path.join("physical_package_id"))?;

        // Name the core after its lowest SMT sibling so the ID is unique
        // across sockets.
        let siblings_path = top_path.join("thread_siblings_list");
        let siblings = std::fs::read_to_string(&siblings_path)
            .with_context(|| format!("Failed to read {}", siblings_path.display()))?;
        let core_id = read_cpulist(&siblings)?
            .into_iter()
            .min()
            .unwrap_or(cpu_id);

        cpus.push((cpu_id, socket_id, core_id));
    }

    if cpus.is_empty() {
        bail!("No CPUs found under {}", root.display());
    }

    Ok(cpus)
}

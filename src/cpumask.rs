// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Cpumask
//!
//! Creating, reading, and manipulating sets of CPU ids.
//!
//! A Cpumask is a BitVec of u64's that grows on demand as CPUs are set, along
//! with helpers for the set algebra the assignment code needs (intersection,
//! union, difference, subset).
//!
//! Cpumasks can be created empty, from a hexadecimal string, or from a kernel
//! cpulist:
//!
//!```
//!     use scx_etopo::Cpumask;
//!     let empty = Cpumask::new();
//!     let from_hex = Cpumask::from_str("0xf0").unwrap();
//!     let from_list = Cpumask::from_cpulist("4-7").unwrap();
//!     assert_eq!(from_hex, from_list);
//!     assert!(empty.is_empty());
//!```
//!
//! A Cpumask can be queried and updated using its helper functions:
//!
//!```
//!     use scx_etopo::Cpumask;
//!     let mut mask = Cpumask::from_str("none").unwrap();
//!     assert!(!mask.test_cpu(0));
//!     mask.set_cpu(0).unwrap();
//!     assert!(mask.test_cpu(0));
//!     assert_eq!(mask.to_cpulist(), "0");
//!```

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use bitvec::prelude::*;
use sscanf::sscanf;
use std::fmt;
use std::ops::BitAndAssign;
use std::ops::BitOrAssign;

/// Upper bound on CPU ids, matching the kernel's largest NR_CPUS.
pub const MAX_CPUS: usize = 8192;

#[derive(Debug, Clone, Default)]
pub struct Cpumask {
    mask: BitVec<u64, Lsb0>,
}

impl Cpumask {
    fn check_cpu(cpu: usize) -> Result<()> {
        if cpu >= MAX_CPUS {
            bail!("Invalid CPU {} passed, max {}", cpu, MAX_CPUS);
        }

        Ok(())
    }

    fn widen(&mut self, len: usize) {
        if self.mask.len() < len {
            self.mask.resize(len, false);
        }
    }

    /// Return copies of both backing BitVecs padded to the same length.
    fn equalized(&self, other: &Cpumask) -> (BitVec<u64, Lsb0>, BitVec<u64, Lsb0>) {
        let len = self.mask.len().max(other.mask.len());
        let mut lhs = self.mask.clone();
        let mut rhs = other.mask.clone();
        lhs.resize(len, false);
        rhs.resize(len, false);
        (lhs, rhs)
    }

    /// Build a new empty Cpumask object.
    pub fn new() -> Cpumask {
        Cpumask { mask: BitVec::new() }
    }

    /// Build a Cpumask object from a hexadecimal string.
    pub fn from_str(cpumask: &str) -> Result<Cpumask> {
        if cpumask == "none" {
            return Ok(Cpumask::new());
        }
        let hex_str = {
            let mut tmp_str = cpumask
                .strip_prefix("0x")
                .unwrap_or(cpumask)
                .replace('_', "");
            if tmp_str.len() % 2 != 0 {
                tmp_str = "0".to_string() + &tmp_str;
            }
            tmp_str
        };
        let byte_vec =
            hex::decode(&hex_str).with_context(|| format!("Failed to parse cpumask: {cpumask}"))?;

        let mut mask = Cpumask::new();
        for (index, &val) in byte_vec.iter().rev().enumerate() {
            let mut v = val;
            while v != 0 {
                let lsb = v.trailing_zeros() as usize;
                v &= !(1 << lsb);
                let cpu = index * 8 + lsb;
                mask.set_cpu(cpu)
                    .with_context(|| format!("Found out of range cpu in cpumask ({cpumask})"))?;
            }
        }

        Ok(mask)
    }

    /// Build a Cpumask from a kernel cpulist such as "0-3,8,10-11".
    pub fn from_cpulist(cpulist: &str) -> Result<Cpumask> {
        Self::from_cpus(read_cpulist(cpulist)?)
    }

    /// Build a Cpumask with every CPU yielded by `cpus` set.
    pub fn from_cpus<I>(cpus: I) -> Result<Cpumask>
    where
        I: IntoIterator<Item = usize>,
    {
        let mut mask = Cpumask::new();
        for cpu in cpus {
            mask.set_cpu(cpu)?;
        }

        Ok(mask)
    }

    /// Return a slice of u64's whose bits reflect the Cpumask.
    pub fn as_raw_slice(&self) -> &[u64] {
        self.mask.as_raw_slice()
    }

    /// Set all bits in the Cpumask to 0
    pub fn clear_all(&mut self) {
        self.mask.fill(false);
    }

    /// Set a bit in the Cpumask, growing it as needed. Returns an error if the
    /// specified CPU exceeds MAX_CPUS.
    pub fn set_cpu(&mut self, cpu: usize) -> Result<()> {
        Self::check_cpu(cpu)?;
        self.widen(cpu + 1);
        self.mask.set(cpu, true);
        Ok(())
    }

    /// Clear a bit from the Cpumask. Returns an error if the specified CPU
    /// exceeds MAX_CPUS.
    pub fn clear_cpu(&mut self, cpu: usize) -> Result<()> {
        Self::check_cpu(cpu)?;
        if cpu < self.mask.len() {
            self.mask.set(cpu, false);
        }
        Ok(())
    }

    /// Test whether the specified CPU bit is set in the Cpumask.
    pub fn test_cpu(&self, cpu: usize) -> bool {
        match self.mask.get(cpu) {
            Some(bit) => *bit,
            None => false,
        }
    }

    /// Count the number of bits set in the Cpumask.
    pub fn weight(&self) -> usize {
        self.mask.count_ones()
    }

    /// Return true if the Cpumask has no bit set, false otherwise.
    pub fn is_empty(&self) -> bool {
        self.mask.not_any()
    }

    /// Create a Cpumask that is the AND of the current Cpumask and another.
    pub fn and(&self, other: &Cpumask) -> Cpumask {
        let (mut lhs, rhs) = self.equalized(other);
        lhs &= rhs;
        Cpumask { mask: lhs }
    }

    /// Create a Cpumask that is the OR of the current Cpumask and another.
    pub fn or(&self, other: &Cpumask) -> Cpumask {
        let (mut lhs, rhs) = self.equalized(other);
        lhs |= rhs;
        Cpumask { mask: lhs }
    }

    /// Create a Cpumask with the CPUs of the current Cpumask that are not in
    /// `other`.
    pub fn and_not(&self, other: &Cpumask) -> Cpumask {
        let (mut lhs, rhs) = self.equalized(other);
        lhs &= !rhs;
        Cpumask { mask: lhs }
    }

    /// Return true if every CPU in the current Cpumask is also in `other`.
    pub fn is_subset(&self, other: &Cpumask) -> bool {
        self.and_not(other).is_empty()
    }

    /// Iterate over the set CPUs in ascending order.
    pub fn iter(&self) -> CpumaskIterator<'_> {
        CpumaskIterator {
            mask: self,
            index: 0,
        }
    }

    /// Collect the set CPUs in ascending order.
    pub fn to_vec(&self) -> Vec<usize> {
        self.iter().collect()
    }

    /// Render the Cpumask in the kernel's cpulist format, e.g. "0-3,8".
    pub fn to_cpulist(&self) -> String {
        let mut groups: Vec<String> = Vec::new();
        let mut cpus = self.iter().peekable();
        while let Some(first) = cpus.next() {
            let mut last = first;
            while cpus.peek() == Some(&(last + 1)) {
                last += 1;
                cpus.next();
            }
            if first == last {
                groups.push(format!("{first}"));
            } else {
                groups.push(format!("{first}-{last}"));
            }
        }
        groups.join(",")
    }

    fn fmt_with(&self, f: &mut fmt::Formatter<'_>, case: char) -> fmt::Result {
        let nr_bits = self.mask.len().max(1);
        let nr_words = nr_bits.div_ceil(32);
        let mut masks: Vec<u32> = self
            .as_raw_slice()
            .iter()
            .flat_map(|x| [*x as u32, (x >> 32) as u32])
            .collect();

        // Throw out possible stray from u64 -> u32, pad an empty mask.
        masks.resize(nr_words, 0);

        // Print the highest 32bit. Trim digits beyond the mask length.
        let width = match nr_bits.div_ceil(4) % 8 {
            0 => 8,
            v => v,
        };
        let top = masks.pop().unwrap_or(0);
        match case {
            'X' => write!(f, "{:0width$X}", top, width = width)?,
            _ => write!(f, "{:0width$x}", top, width = width)?,
        }

        // The rest in descending order.
        for submask in masks.iter().rev() {
            match case {
                'X' => write!(f, ",{submask:08X}")?,
                _ => write!(f, ",{submask:08x}")?,
            }
        }
        Ok(())
    }
}

pub fn read_cpulist(cpulist: &str) -> Result<Vec<usize>> {
    let cpulist = cpulist.trim_end_matches('\0').trim();
    if cpulist.is_empty() {
        return Ok(vec![]);
    }
    let cpu_groups: Vec<&str> = cpulist.split(',').collect();
    let mut cpu_ids = vec![];
    for group in cpu_groups.iter() {
        let (min, max) = match sscanf!(group.trim(), "{usize}-{usize}") {
            Ok((x, y)) => (x, y),
            Err(_) => match sscanf!(group.trim(), "{usize}") {
                Ok(x) => (x, x),
                Err(_) => {
                    bail!("Failed to parse cpulist {}", group.trim());
                }
            },
        };
        if min > max {
            bail!("Invalid cpulist range {}", group.trim());
        }
        for i in min..(max + 1) {
            cpu_ids.push(i);
        }
    }

    Ok(cpu_ids)
}

pub struct CpumaskIterator<'a> {
    mask: &'a Cpumask,
    index: usize,
}

impl Iterator for CpumaskIterator<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.mask.mask.len() {
            let index = self.index;
            self.index += 1;
            if self.mask.test_cpu(index) {
                return Some(index);
            }
        }

        None
    }
}

impl PartialEq for Cpumask {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

impl Eq for Cpumask {}

impl fmt::Display for Cpumask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_with(f, 'x')
    }
}

impl fmt::LowerHex for Cpumask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_with(f, 'x')
    }
}

impl fmt::UpperHex for Cpumask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_with(f, 'X')
    }
}

impl BitAndAssign<&Self> for Cpumask {
    fn bitand_assign(&mut self, rhs: &Self) {
        *self = self.and(rhs);
    }
}

impl BitOrAssign<&Self> for Cpumask {
    fn bitor_assign(&mut self, rhs: &Self) {
        *self = self.or(rhs);
    }
}

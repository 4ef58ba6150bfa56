//! Register batching: turn the active set into the fewest protocol reads.
//!
//! Specs are partitioned by (register_type, slave), sorted by address, and
//! merged greedily: a span joins the current group when the filler between
//! them fits the gap threshold and the combined width stays within the
//! transport's per-call maximum. Output is fully deterministic so plans can
//! be diffed between runs.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::register::{RegisterSpec, RegisterType};

/// A contiguous run of registers read in one protocol call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegisterGroup {
    pub register_type: RegisterType,
    pub slave_id: u8,
    pub start: u16,
    pub count: u16,
    /// Effective poll interval: minimum of the members' scan intervals.
    pub interval_s: u64,
    /// Members ordered ascending by address.
    pub members: Vec<RegisterSpec>,
}

impl RegisterGroup {
    /// One-past-the-end address.
    pub fn end(&self) -> u32 {
        self.start as u32 + self.count as u32
    }

    /// Word offset of a member inside this group's reply buffer.
    pub fn offset_of(&self, spec: &RegisterSpec) -> usize {
        (spec.address - self.start) as usize
    }

    /// Stable identifier for logs and performance samples.
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.register_type, self.slave_id, self.start)
    }
}

/// Compute the read plan for an active register set.
///
/// Re-running on an unchanged set with unchanged thresholds reproduces the
/// identical grouping.
pub fn plan(
    active: &[RegisterSpec],
    default_slave: u8,
    max_batch_words: u16,
    gap_merge_threshold: u16,
) -> Vec<RegisterGroup> {
    let mut partitions: BTreeMap<(RegisterType, u8), Vec<RegisterSpec>> = BTreeMap::new();
    for spec in active {
        if !spec.is_readable() {
            continue;
        }
        partitions
            .entry((spec.register_type, spec.effective_slave(default_slave)))
            .or_default()
            .push(spec.clone());
    }

    let mut groups = Vec::new();
    for ((register_type, slave_id), mut specs) in partitions {
        // Ties on address (two views of the same word) order by unique_id.
        specs.sort_by(|a, b| {
            (a.address, a.unique_id.as_str()).cmp(&(b.address, b.unique_id.as_str()))
        });

        let mut members: Vec<RegisterSpec> = Vec::new();
        let mut start: u32 = 0;
        let mut end: u32 = 0;
        for spec in specs {
            let address = spec.address as u32;
            let width = spec.words() as u32;
            if members.is_empty() {
                start = address;
                end = address + width;
                members.push(spec);
                continue;
            }

            let gap = address.saturating_sub(end);
            let merged_end = end.max(address + width);
            if gap > gap_merge_threshold as u32 || merged_end - start > max_batch_words as u32 {
                groups.push(finish_group(
                    register_type,
                    slave_id,
                    start,
                    end,
                    std::mem::take(&mut members),
                ));
                start = address;
                end = address + width;
            } else {
                end = merged_end;
            }
            members.push(spec);
        }
        if !members.is_empty() {
            groups.push(finish_group(register_type, slave_id, start, end, members));
        }
    }
    groups
}

fn finish_group(
    register_type: RegisterType,
    slave_id: u8,
    start: u32,
    end: u32,
    members: Vec<RegisterSpec>,
) -> RegisterGroup {
    let interval_s = members
        .iter()
        .map(|m| m.scan_interval_s)
        .min()
        .unwrap_or(u64::MAX);
    RegisterGroup {
        register_type,
        slave_id,
        start: start as u16,
        count: (end - start) as u16,
        interval_s,
        members,
    }
}

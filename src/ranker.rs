use crate::config::{NoiseFloor, RankKey};
use crate::model::ProcessUsage;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Reduces a process table to the top consumers by CPU and/or memory.
#[derive(Debug, Clone)]
pub struct ProcessRanker {
    keys: Vec<RankKey>,
    limit: usize,
    noise_floor: NoiseFloor,
}

impl ProcessRanker {
    pub fn new(keys: &[RankKey], limit: usize, noise_floor: NoiseFloor) -> Self {
        let mut unique = Vec::with_capacity(2);
        for key in keys {
            if !unique.contains(key) {
                unique.push(*key);
            }
        }
        Self {
            keys: unique,
            limit,
            noise_floor,
        }
    }

    /// CPU unless only memory was requested.
    pub fn primary_key(&self) -> RankKey {
        if self.keys.len() == 1 && self.keys[0] == RankKey::Memory {
            RankKey::Memory
        } else {
            RankKey::Cpu
        }
    }

    pub fn rank(&self, raw: Vec<ProcessUsage>) -> Vec<ProcessUsage> {
        if self.limit == 0 {
            return Vec::new();
        }

        let mut live: Vec<ProcessUsage> = raw
            .into_iter()
            .filter(|p| p.cpu_percent.is_finite() && p.memory_percent.is_finite())
            .filter(|p| {
                p.cpu_percent >= self.noise_floor.cpu_percent
                    || p.memory_percent >= self.noise_floor.memory_percent
            })
            .collect();

        let keys: &[RankKey] = if self.keys.is_empty() {
            &[RankKey::Cpu]
        } else {
            &self.keys
        };

        let mut selected: HashSet<u32> = HashSet::with_capacity(self.limit * keys.len());
        for key in keys {
            live.sort_by(|a, b| by_key_desc(*key, a, b));
            selected.extend(live.iter().take(self.limit).map(|p| p.pid));
        }

        let primary = self.primary_key();
        let mut out: Vec<ProcessUsage> = live
            .into_iter()
            .filter(|p| selected.remove(&p.pid))
            .collect();
        out.sort_by(|a, b| by_key_desc(primary, a, b));
        out.truncate(self.limit);
        out
    }
}

fn key_value(key: RankKey, p: &ProcessUsage) -> f64 {
    match key {
        RankKey::Cpu => p.cpu_percent,
        RankKey::Memory => p.memory_percent,
    }
}

fn by_key_desc(key: RankKey, a: &ProcessUsage, b: &ProcessUsage) -> Ordering {
    key_value(key, b)
        .total_cmp(&key_value(key, a))
        .then(a.pid.cmp(&b.pid))
}

//! Simulated transport and radio links.
//!
//! Every request and reply crosses the [`Network`], which applies latency,
//! jitter, random loss and partitions from a seeded RNG. Radio link quality
//! between neighbours is tracked separately; motes read it back when they
//! compile statistics.

use std::collections::{BTreeMap, BTreeSet};

use crate::node::NodeId;

// ── Deterministic RNG ─────────────────────────────────────────────────

/// SplitMix64. Same seed, same sequence, on every platform.
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    pub fn new(seed: u64) -> Self {
        DeterministicRng { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9e3779b97f4a7c15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
        z ^ (z >> 31)
    }

    /// Uniform in `[0.0, 1.0)`.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform in `[min, max)`; `min` if the range is empty.
    pub fn next_range(&mut self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        min + (self.next_u64() % (max - min))
    }
}

// ── Config ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    /// Ticks added to every delivered message.
    pub base_latency: u64,
    /// Extra latency drawn from `[0, jitter_range)`.
    pub jitter_range: u64,
    /// Probability of losing a message, in `[0.0, 1.0]`.
    pub drop_probability: f64,
}

impl NetworkConfig {
    /// One tick latency, no jitter, no loss.
    pub fn reliable() -> Self {
        NetworkConfig {
            base_latency: 1,
            jitter_range: 0,
            drop_probability: 0.0,
        }
    }

    pub fn lossy(base_latency: u64, jitter_range: u64, drop_probability: f64) -> Self {
        NetworkConfig {
            base_latency,
            jitter_range,
            drop_probability,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::reliable()
    }
}

// ── Decisions ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkDecision {
    Delivered { latency: u64 },
    DroppedByChance,
    DroppedByPartition,
}

/// Running totals of [`Network::process`] outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkCounters {
    pub delivered: u64,
    pub dropped_by_chance: u64,
    pub dropped_by_partition: u64,
}

impl NetworkCounters {
    pub fn dropped(&self) -> u64 {
        self.dropped_by_chance + self.dropped_by_partition
    }
}

// ── Network ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Network {
    config: NetworkConfig,
    rng: DeterministicRng,
    /// Directional: `(a, b)` means a cannot reach b.
    partitions: BTreeSet<(NodeId, NodeId)>,
    /// Delivery ratio of the radio link `tx -> rx`; absent means perfect.
    quality: BTreeMap<(NodeId, NodeId), f64>,
    counters: NetworkCounters,
}

impl Network {
    pub fn new(config: NetworkConfig, seed: u64) -> Self {
        Network {
            config,
            rng: DeterministicRng::new(seed),
            partitions: BTreeSet::new(),
            quality: BTreeMap::new(),
            counters: NetworkCounters::default(),
        }
    }

    pub fn reliable(seed: u64) -> Self {
        Self::new(NetworkConfig::reliable(), seed)
    }

    // ── Partitions ────────────────────────────────────────────────

    pub fn add_partition(&mut self, a: NodeId, b: NodeId) {
        self.partitions.insert((a, b));
        self.partitions.insert((b, a));
    }

    pub fn remove_partition(&mut self, a: NodeId, b: NodeId) {
        self.partitions.remove(&(a, b));
        self.partitions.remove(&(b, a));
    }

    pub fn is_partitioned(&self, from: NodeId, to: NodeId) -> bool {
        self.partitions.contains(&(from, to))
    }

    pub fn heal_all(&mut self) {
        self.partitions.clear();
    }

    // ── Link quality ──────────────────────────────────────────────

    /// Set the delivery ratio of `tx -> rx`, clamped to `[0.0, 1.0]`.
    pub fn set_link_quality(&mut self, tx: NodeId, rx: NodeId, ratio: f64) {
        self.quality.insert((tx, rx), ratio.clamp(0.0, 1.0));
    }

    pub fn link_quality(&self, tx: NodeId, rx: NodeId) -> f64 {
        self.quality.get(&(tx, rx)).copied().unwrap_or(1.0)
    }

    // ── Message processing ────────────────────────────────────────

    /// Decide the fate of one message. Consumes RNG state.
    pub fn process(&mut self, from: NodeId, to: NodeId) -> NetworkDecision {
        if self.partitions.contains(&(from, to)) {
            self.counters.dropped_by_partition += 1;
            return NetworkDecision::DroppedByPartition;
        }
        if self.config.drop_probability > 0.0 && self.rng.next_f64() < self.config.drop_probability {
            self.counters.dropped_by_chance += 1;
            return NetworkDecision::DroppedByChance;
        }
        let jitter = if self.config.jitter_range > 0 {
            self.rng.next_range(0, self.config.jitter_range)
        } else {
            0
        };
        self.counters.delivered += 1;
        NetworkDecision::Delivered {
            latency: self.config.base_latency + jitter,
        }
    }

    pub fn counters(&self) -> NetworkCounters {
        self.counters
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut NetworkConfig {
        &mut self.config
    }
}

//! Implementation of the partition registry.
//!
//! A partition is a named pool of machines with a known hardware profile.
//! Limits are optional; when set, requests exceeding them are rejected at
//! validation time instead of pending indefinitely in the scheduler's queue.

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

use crate::MemoryLimit;
use crate::TimeLimit;

/// Describes the hardware profile of a single partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct Partition {
    /// The maximum wall-clock time of a job on this partition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_time: Option<TimeLimit>,
    /// The maximum memory a single node of this partition can provision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory: Option<MemoryLimit>,
    /// The accelerators available on each node, keyed by model (e.g. `a100`).
    ///
    /// An empty map means the partition has no accelerator capacity.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub accelerators: IndexMap<String, u32>,
}

impl Partition {
    /// Determines whether the partition is equipped with accelerators.
    pub fn has_accelerators(&self) -> bool {
        self.accelerators.values().any(|count| *count > 0)
    }

    /// Gets the per-node capacity for the given accelerator model.
    ///
    /// Returns zero if the model is not offered by this partition.
    pub fn accelerator_capacity(&self, kind: &str) -> u32 {
        self.accelerators.get(kind).copied().unwrap_or(0)
    }

    /// Validates the partition definition.
    pub fn validate(&self, name: &str) -> Result<(), String> {
        if name.is_empty() {
            return Err("partition name cannot be empty".to_string());
        }

        if self.accelerators.keys().any(|kind| kind.is_empty()) {
            return Err(format!(
                "partition `{name}` has an accelerator with an empty model name"
            ));
        }

        Ok(())
    }
}

/// An ordered collection of known partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionRegistry(IndexMap<String, Partition>);

impl PartitionRegistry {
    /// Creates an empty registry.
    ///
    /// Use [`PartitionRegistry::default`] for the built-in partitions.
    pub fn empty() -> Self {
        Self(IndexMap::new())
    }

    /// Adds a partition to the registry, replacing any partition with the same
    /// name.
    pub fn insert(&mut self, name: impl Into<String>, partition: Partition) {
        self.0.insert(name.into(), partition);
    }

    /// Gets a partition by name.
    pub fn get(&self, name: &str) -> Option<&Partition> {
        self.0.get(name)
    }

    /// Iterates over the partitions in the registry.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Partition)> {
        self.0.iter().map(|(name, partition)| (name.as_str(), partition))
    }

    /// Determines if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Validates every partition in the registry.
    pub fn validate(&self) -> Result<(), String> {
        for (name, partition) in &self.0 {
            partition.validate(name)?;
        }

        Ok(())
    }
}

impl Default for PartitionRegistry {
    /// The built-in registry, modelled on a typical university cluster.
    fn default() -> Self {
        let hours = |h: u64| TimeLimit::from_secs(h * 3600);
        let memory = |s: &str| s.parse::<MemoryLimit>().ok();

        let mut registry = Self::empty();
        registry.insert(
            "devel",
            Partition {
                max_time: hours(6),
                max_memory: memory("256G"),
                ..Default::default()
            },
        );
        registry.insert(
            "day",
            Partition {
                max_time: hours(24),
                max_memory: memory("256G"),
                ..Default::default()
            },
        );
        registry.insert(
            "week",
            Partition {
                max_time: hours(7 * 24),
                max_memory: memory("256G"),
                ..Default::default()
            },
        );
        registry.insert(
            "bigmem",
            Partition {
                max_time: hours(24),
                max_memory: memory("4T"),
                ..Default::default()
            },
        );
        registry.insert(
            "gpu",
            Partition {
                max_time: hours(2 * 24),
                max_memory: memory("1T"),
                accelerators: [
                    ("a100".to_string(), 4),
                    ("v100".to_string(), 2),
                    ("rtx5000".to_string(), 4),
                ]
                .into(),
            },
        );
        registry
    }
}

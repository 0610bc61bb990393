use crate::PhaseId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Counters and recorded values of a single phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsData {
    pub counters: BTreeMap<String, u64>,
    /// values in insertion order
    pub values: BTreeMap<String, Vec<u64>>,
}

impl StatsData {
    pub fn increment(&mut self, name: &str) {
        *self.counters.entry(name.to_string()).or_default() += 1;
    }

    pub fn add_value(&mut self, name: &str, value: u64) {
        self.values.entry(name.to_string()).or_default().push(value);
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn values(&self, name: &str) -> &[u64] {
        self.values.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Mean of the recorded values, `None` when nothing was recorded
    pub fn mean(&self, name: &str) -> Option<f64> {
        let values = self.values(name);
        if values.is_empty() {
            None
        } else {
            Some(values.iter().map(|v| *v as f64).sum::<f64>() / values.len() as f64)
        }
    }
}

/// Per-phase statistics, created lazily on first use of a phase id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhaseStats {
    phases: BTreeMap<PhaseId, StatsData>,
}

impl PhaseStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, name: &str, phase: PhaseId) {
        self.phases.entry(phase).or_default().increment(name);
    }

    pub fn add_value(&mut self, name: &str, value: u64, phase: PhaseId) {
        self.phases.entry(phase).or_default().add_value(name, value);
    }

    pub fn get(&self, phase: PhaseId) -> Option<&StatsData> {
        self.phases.get(&phase)
    }

    /// Phases in ascending id order, unknown first
    pub fn iter(&self) -> impl Iterator<Item = (&PhaseId, &StatsData)> {
        self.phases.iter()
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }
}

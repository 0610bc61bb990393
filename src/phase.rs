use crate::Signature;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index into the phase table, or -1 when no confirmed phase matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhaseId(i64);

impl PhaseId {
    pub const UNKNOWN: PhaseId = PhaseId(-1);

    pub fn new(index: usize) -> Self {
        Self(index as i64)
    }

    pub fn is_unknown(&self) -> bool {
        self.0 < 0
    }

    pub fn index(&self) -> Option<usize> {
        if self.is_unknown() {
            None
        } else {
            Some(self.0 as usize)
        }
    }

    pub fn raw(&self) -> i64 {
        self.0
    }
}

impl Default for PhaseId {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Append-only registry of confirmed phase signatures, the index is the phase id
#[derive(Clone, Debug, Default)]
pub struct PhaseTable {
    entries: Vec<Signature>,
}

impl PhaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, phase: PhaseId) -> Option<&Signature> {
        phase.index().and_then(|index| self.entries.get(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Signature> {
        self.entries.iter()
    }

    /// Record a newly confirmed phase
    pub fn push(&mut self, signature: Signature) -> PhaseId {
        self.entries.push(signature);
        PhaseId::new(self.entries.len() - 1)
    }

    /// Nearest entry strictly closer than `threshold`; the lowest index wins ties
    pub fn closest(&self, signature: &Signature, threshold: f64) -> Option<(PhaseId, f64)> {
        let mut best: Option<(PhaseId, f64)> = None;
        for (index, entry) in self.entries.iter().enumerate() {
            let diff = signature.difference(entry);
            if diff >= threshold {
                continue;
            }
            match best {
                Some((_, best_diff)) if diff >= best_diff => {}
                _ => best = Some((PhaseId::new(index), diff)),
            }
        }
        best
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

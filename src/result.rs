use crate::{PhaseStats, ReplayOutcome, RunConfig};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, path::PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectResult {
    /// configuration
    pub trace_paths: Vec<PathBuf>,
    pub config: RunConfig,
    pub generated_at: DateTime<Local>,

    /// log files written by the run
    pub phase_trace_path: Option<PathBuf>,
    pub dram_log_path: Option<PathBuf>,

    /// overall statistics
    pub instructions: u64,
    pub cycles: u64,
    pub transactions: u64,
    /// number of phases in the phase table at the end of the run
    pub phases: usize,
    /// number of phase changes
    pub transitions: u64,
    /// intervals whose phase stayed unknown
    pub unknown_intervals: u64,

    /// per phase statistics
    pub stats: PhaseStats,
}

impl DetectResult {
    pub fn new(
        trace_paths: Vec<PathBuf>,
        config: RunConfig,
        outcome: ReplayOutcome,
        phase_trace_path: Option<PathBuf>,
        dram_log_path: Option<PathBuf>,
    ) -> Self {
        let unknown_intervals = outcome
            .phase_trace
            .iter()
            .filter(|phase| phase.is_unknown())
            .count() as u64;
        Self {
            trace_paths,
            config,
            generated_at: Local::now(),
            phase_trace_path,
            dram_log_path,
            instructions: outcome.instructions,
            cycles: outcome.cycles,
            transactions: outcome.transactions,
            phases: outcome.phases,
            transitions: outcome.transitions,
            unknown_intervals,
            stats: outcome.stats,
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Mean transaction latency over the whole run
    pub fn average_latency(&self) -> Option<f64> {
        let (sum, count) = self
            .stats
            .iter()
            .flat_map(|(_, data)| data.values("latency"))
            .fold((0u64, 0u64), |(sum, count), latency| (sum + latency, count + 1));
        if count == 0 {
            None
        } else {
            Some(sum as f64 / count as f64)
        }
    }
}

//! Online phase detection over a stream of retired instruction addresses.
//!
//! Every instruction sets one hashed bit in the current signature. Every
//! `interval_len` instructions the signature is compared with the previous
//! one: a run of `stable_min` similar intervals confirms a new phase, while
//! a dissimilar interval falls back to the nearest known phase, if any.
use crate::{ConfigError, DetectorConfig, PhaseId, PhaseTable, Signature, SignatureDigest};
use log::debug;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

/// Called on every interval boundary with the run context and the new phase
pub type PhaseListener<C> = Box<dyn FnMut(&mut C, PhaseId)>;

pub struct PhaseDetector<C = ()> {
    config: DetectorConfig,
    digest: SignatureDigest,

    current_signature: Signature,
    last_signature: Signature,
    instruction_count: u64,
    stable_count: u32,
    phase: PhaseId,

    phase_table: PhaseTable,
    /// one entry per completed interval
    phase_trace: Vec<PhaseId>,

    listeners: Vec<PhaseListener<C>>,
}

impl<C> PhaseDetector<C> {
    pub fn new(config: DetectorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let digest = SignatureDigest::from_config(&config)?;
        let len = digest.signature_len();
        Ok(Self {
            config,
            digest,
            current_signature: Signature::new(len),
            last_signature: Signature::new(len),
            instruction_count: 0,
            stable_count: 0,
            phase: PhaseId::UNKNOWN,
            phase_table: PhaseTable::new(),
            phase_trace: vec![],
            listeners: vec![],
        })
    }

    /// Listeners run in registration order and stay for the detector's lifetime
    pub fn register_listener<F>(&mut self, listener: F)
    where
        F: FnMut(&mut C, PhaseId) + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Feed one retired instruction. Returns the phase id when this
    /// instruction completes an interval, after all listeners have run.
    pub fn detect(&mut self, instruction_pointer: u64, context: &mut C) -> Option<PhaseId> {
        self.current_signature
            .set(self.digest.hash_address(instruction_pointer));

        self.instruction_count += 1;
        if self.instruction_count % self.config.interval_len != 0 {
            return None;
        }

        let diff = self.current_signature.difference(&self.last_signature);
        if diff < self.config.threshold {
            self.stable_count = self.stable_count.saturating_add(1);
            if self.stable_count >= self.config.stable_min && self.phase.is_unknown() {
                self.phase = self.phase_table.push(self.current_signature.clone());
                debug!(
                    "Confirmed phase {} after {} stable intervals at instruction {}",
                    self.phase, self.stable_count, self.instruction_count
                );
            }
        } else {
            self.stable_count = 0;
            self.phase = PhaseId::UNKNOWN;

            // maybe we are back in a phase seen before
            if let Some((phase, best_diff)) = self
                .phase_table
                .closest(&self.current_signature, self.config.threshold)
            {
                debug!(
                    "Matched phase {} with difference {:.3} at instruction {}",
                    phase, best_diff, self.instruction_count
                );
                self.phase = phase;
            }
        }

        std::mem::swap(&mut self.last_signature, &mut self.current_signature);
        self.current_signature.clear();

        self.phase_trace.push(self.phase);

        for listener in self.listeners.iter_mut() {
            listener(context, self.phase);
        }

        Some(self.phase)
    }

    /// Start a fresh, independent run; listeners are kept
    pub fn reset(&mut self) {
        self.current_signature.clear();
        self.last_signature.clear();
        self.instruction_count = 0;
        self.stable_count = 0;
        self.phase = PhaseId::UNKNOWN;
        self.phase_table.clear();
        self.phase_trace.clear();
    }

    /// Optionally dump the phase trace, then reset
    pub fn cleanup(&mut self, log_path: Option<&Path>) -> anyhow::Result<()> {
        if let Some(path) = log_path {
            let mut writer = BufWriter::new(File::create(path)?);
            self.write_phase_trace(&mut writer)?;
            writer.flush()?;
        }
        self.reset();
        Ok(())
    }

    /// One `<first instruction of interval>,<phase id>` line per interval
    pub fn write_phase_trace<W: Write>(&self, writer: &mut W) -> anyhow::Result<()> {
        for (index, phase) in self.phase_trace.iter().enumerate() {
            writeln!(writer, "{},{}", index as u64 * self.config.interval_len, phase)?;
        }
        Ok(())
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn phase(&self) -> PhaseId {
        self.phase
    }

    pub fn phase_table(&self) -> &PhaseTable {
        &self.phase_table
    }

    pub fn phase_trace(&self) -> &[PhaseId] {
        &self.phase_trace
    }

    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    pub fn stable_count(&self) -> u32 {
        self.stable_count
    }

    pub fn digest(&self) -> &SignatureDigest {
        &self.digest
    }
}

use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path};
use thiserror::Error;

/// Width of the digest produced by `SignatureDigest::hash_address` before truncation
pub const DIGEST_BITS: u32 = 32;

/// Widest signature a detector accepts, 2 MiB per signature
pub const MAX_LOG2_SIGNATURE_LEN: u32 = 24;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("interval length must be positive")]
    ZeroIntervalLength,
    #[error("threshold {0} is outside (0, 1]")]
    ThresholdOutOfRange(f64),
    #[error("stable_min must be positive")]
    ZeroStableMin,
    #[error("log2_signature_len must be positive")]
    ZeroSignatureLength,
    #[error("log2_signature_len {log2_len} exceeds {max}")]
    SignatureTooWide { log2_len: u32, max: u32 },
    #[error("drop_bits {0} would discard the whole 64-bit address")]
    DropBitsTooLarge(u32),
    #[error("memory queue depth must be positive")]
    ZeroQueueDepth,
    #[error("memory latencies must be positive")]
    ZeroLatency,
    #[error("memory must have at least one bank")]
    ZeroBanks,
    #[error("row_bits {0} would discard the whole 64-bit address")]
    RowBitsTooLarge(u32),
}

/// What happens to transactions still in flight when the phase changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingPolicy {
    /// forget pending issue clocks, their completions are ignored
    #[default]
    Discard,
    /// keep pending issue clocks, latency goes to the phase active at completion
    AttributeToCompletion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// low-order address bits ignored before hashing
    pub drop_bits: u32,
    /// signature width is 2 ** log2_signature_len bits
    pub log2_signature_len: u32,
    /// instructions per interval
    pub interval_len: u64,
    /// signatures closer than this are considered the same phase
    pub threshold: f64,
    /// consecutive stable intervals before a new phase is confirmed
    pub stable_min: u32,
    pub pending_policy: PendingPolicy,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            drop_bits: 3,
            log2_signature_len: 10,
            interval_len: 10_000,
            threshold: 0.5,
            stable_min: 4,
            pending_policy: PendingPolicy::Discard,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_len == 0 {
            return Err(ConfigError::ZeroIntervalLength);
        }
        // written this way so that NaN is rejected too
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(ConfigError::ThresholdOutOfRange(self.threshold));
        }
        if self.stable_min == 0 {
            return Err(ConfigError::ZeroStableMin);
        }
        if self.log2_signature_len == 0 {
            return Err(ConfigError::ZeroSignatureLength);
        }
        if self.log2_signature_len > MAX_LOG2_SIGNATURE_LEN {
            return Err(ConfigError::SignatureTooWide {
                log2_len: self.log2_signature_len,
                max: MAX_LOG2_SIGNATURE_LEN,
            });
        }
        if self.drop_bits >= u64::BITS {
            return Err(ConfigError::DropBitsTooLarge(self.drop_bits));
        }
        Ok(())
    }

    /// Signature width in bits
    pub fn signature_len(&self) -> usize {
        1 << self.log2_signature_len
    }
}

/// Parameters of the bundled `SimpleMemory` engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// maximum transactions in flight
    pub queue_depth: usize,
    pub banks: u64,
    /// log2 of the row size in bytes
    pub row_bits: u32,
    pub row_hit_latency: u64,
    pub row_miss_latency: u64,
    pub write_latency: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            queue_depth: 32,
            banks: 8,
            row_bits: 13,
            row_hit_latency: 20,
            row_miss_latency: 45,
            write_latency: 30,
        }
    }
}

impl MemoryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_depth == 0 {
            return Err(ConfigError::ZeroQueueDepth);
        }
        if self.banks == 0 {
            return Err(ConfigError::ZeroBanks);
        }
        if self.row_bits >= u64::BITS {
            return Err(ConfigError::RowBitsTooLarge(self.row_bits));
        }
        if self.row_hit_latency == 0 || self.row_miss_latency == 0 || self.write_latency == 0 {
            return Err(ConfigError::ZeroLatency);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub detector: DetectorConfig,
    pub memory: MemoryConfig,
}

impl RunConfig {
    /// Load from a json file, missing fields take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<RunConfig> {
        let config: RunConfig = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.detector.validate()?;
        self.memory.validate()
    }
}

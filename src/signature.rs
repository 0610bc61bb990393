use crate::{ConfigError, DIGEST_BITS, DetectorConfig};
use bitvec::vec::BitVec;

/// Bloom-filter like digest of the instruction addresses seen in one interval
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    bits: BitVec,
}

impl Signature {
    pub fn new(len: usize) -> Self {
        Self {
            bits: BitVec::repeat(false, len),
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.not_any()
    }

    pub fn set(&mut self, index: usize) {
        self.bits.set(index, true);
    }

    pub fn get(&self, index: usize) -> bool {
        self.bits[index]
    }

    pub fn count_ones(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn clear(&mut self) {
        self.bits.fill(false);
    }

    /// See `difference`
    pub fn difference(&self, other: &Signature) -> f64 {
        difference(self, other)
    }
}

/// |a xor b| / |a or b|, in [0, 1]
///
/// Two empty signatures carry no information and are treated as identical,
/// so the result is 0 instead of 0/0.
pub fn difference(a: &Signature, b: &Signature) -> f64 {
    debug_assert_eq!(a.len(), b.len(), "signatures must have equal width");

    let ones_a = a.count_ones();
    let ones_b = b.count_ones();
    // bits past the end of a narrower `b` count as unset
    let both = a
        .bits
        .iter_ones()
        .filter(|&index| b.bits.get(index).is_some_and(|bit| *bit))
        .count();

    let union = ones_a + ones_b - both;
    if union == 0 {
        return 0.0;
    }
    let xor = ones_a + ones_b - 2 * both;
    xor as f64 / union as f64
}

/// Maps an instruction address to a bit position in a signature
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignatureDigest {
    drop_bits: u32,
    log2_signature_len: u32,
}

impl SignatureDigest {
    pub fn new(drop_bits: u32, log2_signature_len: u32) -> Result<Self, ConfigError> {
        if log2_signature_len == 0 {
            return Err(ConfigError::ZeroSignatureLength);
        }
        if log2_signature_len > DIGEST_BITS {
            return Err(ConfigError::SignatureTooWide {
                log2_len: log2_signature_len,
                max: DIGEST_BITS,
            });
        }
        if drop_bits >= u64::BITS {
            return Err(ConfigError::DropBitsTooLarge(drop_bits));
        }
        Ok(Self {
            drop_bits,
            log2_signature_len,
        })
    }

    pub fn from_config(config: &DetectorConfig) -> Result<Self, ConfigError> {
        Self::new(config.drop_bits, config.log2_signature_len)
    }

    pub fn signature_len(&self) -> usize {
        1 << self.log2_signature_len
    }

    /// Drop the low bits, hash, then keep the top `log2_signature_len` bits of the hash
    pub fn hash_address(&self, address: u64) -> usize {
        let hashed = hash32(address >> self.drop_bits);
        (hashed >> (DIGEST_BITS - self.log2_signature_len)) as usize
    }
}

/// Fixed, unseeded 64 to 32 bit mix. Must stay stable across runs.
fn hash32(value: u64) -> u32 {
    let mut h = value.wrapping_mul(0x517cc1b727220a95);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ceb9fe1a85ec53);
    h ^= h >> 33;
    (h >> 32) as u32
}

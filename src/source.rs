//! Producers of memory transactions for the replay loop.
use crate::{TraceReader, TraceRecord};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::{io::Read, path::Path};

/// One memory access together with the instruction that issued it
pub type Transaction = TraceRecord;

pub trait TransactionSource {
    /// `None` once the source is exhausted
    fn next_transaction(&mut self) -> anyhow::Result<Option<Transaction>>;

    /// Called once per simulated cycle
    fn on_cycle(&mut self) {}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomSourceConfig {
    pub seed: u64,
    /// number of code regions the instruction pointers rotate through
    pub regions: u64,
    /// transactions before switching to the next region
    pub region_span: u64,
    /// distinct instructions per region
    pub region_size: u64,
}

impl Default for RandomSourceConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            regions: 4,
            region_span: 200_000,
            region_size: 256,
        }
    }
}

/// Uniformly random cache-line addresses, one write in three
pub struct RandomSource {
    config: RandomSourceConfig,
    rng: ChaCha8Rng,
    issued: u64,
}

const CODE_BASE: u64 = 0x40_0000;
const REGION_STRIDE: u64 = 0x10_0000;

impl RandomSource {
    pub fn new(config: RandomSourceConfig) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
            issued: 0,
        }
    }
}

impl TransactionSource for RandomSource {
    fn next_transaction(&mut self) -> anyhow::Result<Option<Transaction>> {
        let region = (self.issued / self.config.region_span.max(1)) % self.config.regions.max(1);
        let offset = self.rng.gen_range(0..self.config.region_size.max(1));
        let instruction_pointer = CODE_BASE + region * REGION_STRIDE + offset * 4;

        let virtual_address = self.rng.r#gen::<u64>() & !0x3f;
        let is_write = self.rng.gen_range(0..3) == 0;

        self.issued += 1;
        Ok(Some(Transaction {
            instruction_pointer,
            virtual_address,
            is_write,
        }))
    }
}

/// Streaming `a[i] = b[i] + c[i]` kernel: read b, read c, write a
pub struct StreamSource {
    addr_a: u64,
    addr_b: u64,
    addr_c: u64,
    offset: u64,
    /// position in the read b, read c, write a sequence
    step: u8,
}

/// elements in each array
const STREAM_ARRAY_SIZE: u64 = 2 << 20;
/// stride in bytes
const STREAM_STRIDE: u64 = 64;
const STREAM_LOOP_PC: u64 = 0x40_1000;

impl StreamSource {
    pub fn new(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        // three arrays placed at random line-aligned bases
        let mut base = || rng.gen_range(0..(1u64 << 40)) & !0xfff;
        Self {
            addr_a: base(),
            addr_b: base(),
            addr_c: base(),
            offset: 0,
            step: 0,
        }
    }
}

impl TransactionSource for StreamSource {
    fn next_transaction(&mut self) -> anyhow::Result<Option<Transaction>> {
        let (base, is_write) = match self.step {
            0 => (self.addr_b, false),
            1 => (self.addr_c, false),
            _ => (self.addr_a, true),
        };
        let transaction = Transaction {
            instruction_pointer: STREAM_LOOP_PC + self.step as u64 * 4,
            virtual_address: base + self.offset,
            is_write,
        };

        self.step += 1;
        if self.step == 3 {
            self.step = 0;
            self.offset += STREAM_STRIDE;
            if self.offset >= STREAM_ARRAY_SIZE {
                self.offset = 0;
            }
        }
        Ok(Some(transaction))
    }
}

/// Replays a binary trace file
pub struct TraceSource<R: Read> {
    reader: TraceReader<R>,
}

impl TraceSource<Box<dyn Read>> {
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        Ok(Self {
            reader: TraceReader::open(path)?,
        })
    }
}

impl<R: Read> TraceSource<R> {
    pub fn new(reader: TraceReader<R>) -> Self {
        Self { reader }
    }

    pub fn records(&self) -> u64 {
        self.reader.records()
    }
}

impl<R: Read> TransactionSource for TraceSource<R> {
    fn next_transaction(&mut self) -> anyhow::Result<Option<Transaction>> {
        self.reader.next_record()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io::Cursor;

    fn take<S: TransactionSource>(source: &mut S, count: usize) -> Vec<Transaction> {
        (0..count)
            .map(|_| source.next_transaction().unwrap().unwrap())
            .collect()
    }

    #[test]
    fn test_random_source_is_seeded() {
        let config = RandomSourceConfig {
            seed: 42,
            ..RandomSourceConfig::default()
        };
        let first = take(&mut RandomSource::new(config.clone()), 1000);
        let second = take(&mut RandomSource::new(config), 1000);
        assert_eq!(first, second);

        for transaction in &first {
            assert_eq!(transaction.virtual_address % 64, 0);
        }
        let writes = first.iter().filter(|t| t.is_write).count();
        assert!(writes > 200 && writes < 470);
    }

    #[test]
    fn test_random_source_rotates_regions() {
        let mut source = RandomSource::new(RandomSourceConfig {
            seed: 1,
            regions: 2,
            region_span: 10,
            region_size: 16,
        });
        let transactions = take(&mut source, 30);
        let region = |t: &Transaction| (t.instruction_pointer - CODE_BASE) / REGION_STRIDE;
        assert!(transactions[..10].iter().all(|t| region(t) == 0));
        assert!(transactions[10..20].iter().all(|t| region(t) == 1));
        assert!(transactions[20..].iter().all(|t| region(t) == 0));
    }

    #[test]
    fn test_stream_pattern() {
        let mut source = StreamSource::new(7);
        let transactions = take(&mut source, 6);

        assert!(!transactions[0].is_write);
        assert!(!transactions[1].is_write);
        assert!(transactions[2].is_write);
        assert_eq!(
            transactions[3].virtual_address,
            transactions[0].virtual_address + STREAM_STRIDE
        );
        assert_eq!(
            transactions[5].virtual_address,
            transactions[2].virtual_address + STREAM_STRIDE
        );

        let pcs: HashSet<u64> = transactions.iter().map(|t| t.instruction_pointer).collect();
        assert_eq!(pcs.len(), 3);
    }

    #[test]
    fn test_stream_wraps() {
        let mut source = StreamSource::new(0);
        let first = source.next_transaction().unwrap().unwrap();
        let per_pass = (STREAM_ARRAY_SIZE / STREAM_STRIDE) as usize * 3;
        take(&mut source, per_pass - 1);
        let again = source.next_transaction().unwrap().unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn test_trace_source() {
        let records = [
            TraceRecord {
                instruction_pointer: 0x1000,
                virtual_address: 0x2000,
                is_write: false,
            },
            TraceRecord {
                instruction_pointer: 0x1004,
                virtual_address: 0x3000,
                is_write: true,
            },
        ];
        let content: Vec<u8> = records.iter().flat_map(|r| r.to_bytes()).collect();
        let mut source = TraceSource::new(TraceReader::new(Cursor::new(content)));
        assert_eq!(source.next_transaction().unwrap(), Some(records[0]));
        assert_eq!(source.next_transaction().unwrap(), Some(records[1]));
        assert_eq!(source.next_transaction().unwrap(), None);
        assert_eq!(source.records(), 2);
    }
}

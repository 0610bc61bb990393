use crate::MemoryConfig;
use std::{cmp::Reverse, collections::BinaryHeap};

/// A finished memory transaction, reported once per accepted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Completion {
    pub address: u64,
    pub is_write: bool,
}

/// Cycle-driven memory timing model driven by the replay loop
pub trait MemoryEngine {
    /// Offer a transaction. On `true` the engine has taken it and will
    /// report its completion from a later `advance`.
    fn can_accept_transaction(&mut self, address: u64, is_write: bool) -> bool;

    /// Advance one cycle, reporting every transaction finished in it
    fn advance(&mut self, on_complete: &mut dyn FnMut(Completion));

    /// Transactions accepted but not yet completed
    fn in_flight(&self) -> usize;
}

/// Bank/row aware fixed-latency memory, standing in for a cycle-accurate DRAM model
#[derive(Debug, Clone)]
pub struct SimpleMemory {
    config: MemoryConfig,
    cycle: u64,
    /// issue sequence number breaks ties between equal ready cycles
    sequence: u64,
    queue: BinaryHeap<Reverse<(u64, u64, u64, bool)>>,
    open_rows: Vec<Option<u64>>,

    pub reads: u64,
    pub writes: u64,
    pub row_hits: u64,
    pub row_misses: u64,
}

impl SimpleMemory {
    pub fn new(config: MemoryConfig) -> Self {
        let banks = config.banks as usize;
        Self {
            config,
            cycle: 0,
            sequence: 0,
            queue: BinaryHeap::new(),
            open_rows: vec![None; banks],
            reads: 0,
            writes: 0,
            row_hits: 0,
            row_misses: 0,
        }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    fn latency(&mut self, address: u64, is_write: bool) -> u64 {
        // rows are interleaved across banks
        let row = address >> self.config.row_bits;
        let bank = (row % self.config.banks) as usize;
        let hit = self.open_rows[bank] == Some(row);
        self.open_rows[bank] = Some(row);
        if hit {
            self.row_hits += 1;
        } else {
            self.row_misses += 1;
        }

        if is_write {
            self.config.write_latency
        } else if hit {
            self.config.row_hit_latency
        } else {
            self.config.row_miss_latency
        }
    }
}

impl MemoryEngine for SimpleMemory {
    fn can_accept_transaction(&mut self, address: u64, is_write: bool) -> bool {
        if self.queue.len() >= self.config.queue_depth {
            return false;
        }
        let ready = self.cycle + self.latency(address, is_write);
        self.queue
            .push(Reverse((ready, self.sequence, address, is_write)));
        self.sequence += 1;
        if is_write {
            self.writes += 1;
        } else {
            self.reads += 1;
        }
        true
    }

    fn advance(&mut self, on_complete: &mut dyn FnMut(Completion)) {
        self.cycle += 1;
        while let Some(Reverse((ready, _, address, is_write))) = self.queue.peek().copied() {
            if ready > self.cycle {
                break;
            }
            self.queue.pop();
            on_complete(Completion { address, is_write });
        }
    }

    fn in_flight(&self) -> usize {
        self.queue.len()
    }
}

//! Per-run state shared by the phase-transition and latency listeners.
//!
//! The context owns the pending-transaction map, the simulation clock, the
//! latency accumulators of the current phase span and the DRAM phase log.
use crate::{PendingPolicy, PhaseId, PhaseStats};
use log::{trace, warn};
use std::{collections::HashMap, io::Write};

/// Latency summary of one phase span, written on each phase transition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpanSummary {
    pub interval: u64,
    pub new_phase: PhaseId,
    pub total_latency: u64,
    pub transactions: u64,
}

impl SpanSummary {
    /// `None` when no transaction completed during the span
    pub fn average_access_time(&self) -> Option<f64> {
        if self.transactions == 0 {
            None
        } else {
            Some(self.total_latency as f64 / self.transactions as f64)
        }
    }

    /// `<interval>,<new phase>,<average access time>`, `nan` for an empty span
    pub fn to_log_line(&self) -> String {
        match self.average_access_time() {
            Some(aat) => format!("{},{},{}", self.interval, self.new_phase, aat),
            None => format!("{},{},nan", self.interval, self.new_phase),
        }
    }
}

pub struct RunContext<W: Write> {
    policy: PendingPolicy,
    /// address -> clock it was issued at
    pending: HashMap<u64, u64>,
    clock: u64,

    current_phase: PhaseId,
    /// last phase seen by `on_phase`, `None` before the first boundary
    old_phase: Option<PhaseId>,
    interval: u64,
    transitions: u64,

    span_latency: u64,
    span_transactions: u64,

    dram_log: Option<W>,
    stats: PhaseStats,
}

impl<W: Write> RunContext<W> {
    pub fn new(policy: PendingPolicy, dram_log: Option<W>) -> Self {
        Self {
            policy,
            pending: HashMap::new(),
            clock: 0,
            current_phase: PhaseId::UNKNOWN,
            old_phase: None,
            interval: 0,
            transitions: 0,
            span_latency: 0,
            span_transactions: 0,
            dram_log,
            stats: PhaseStats::new(),
        }
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn tick(&mut self) {
        self.clock += 1;
    }

    /// Remember when `address` was handed to the memory engine
    pub fn issue(&mut self, address: u64) {
        self.pending.insert(address, self.clock);
    }

    /// Latency listener. Completions without a pending issue are ignored.
    pub fn on_transaction_complete(&mut self, address: u64) {
        let Some(issued) = self.pending.remove(&address) else {
            trace!("Ignore completion of 0x{:x} without pending issue", address);
            return;
        };
        let latency = self.clock - issued;
        trace!(
            "Transaction 0x{:x} completed after {} cycles in phase {}",
            address, latency, self.current_phase
        );
        self.span_latency += latency;
        self.span_transactions += 1;
        self.stats.increment("transactions", self.current_phase);
        self.stats.add_value("latency", latency, self.current_phase);
    }

    /// Phase-transition listener, called on every interval boundary
    pub fn on_phase(&mut self, new_phase: PhaseId) {
        self.stats.increment("intervals", new_phase);

        if self.old_phase != Some(new_phase) {
            let summary = SpanSummary {
                interval: self.interval,
                new_phase,
                total_latency: self.span_latency,
                transactions: self.span_transactions,
            };
            self.write_summary(&summary);

            if let Some(old_phase) = self.old_phase {
                self.stats.increment("spans", old_phase);
                self.stats
                    .add_value("span_latency", self.span_latency, old_phase);
                self.stats
                    .add_value("span_transactions", self.span_transactions, old_phase);
                self.transitions += 1;
            }

            self.old_phase = Some(new_phase);
            self.span_latency = 0;
            self.span_transactions = 0;
            if self.policy == PendingPolicy::Discard {
                if !self.pending.is_empty() {
                    trace!(
                        "Discard {} pending transactions at phase transition",
                        self.pending.len()
                    );
                }
                self.pending.clear();
            }
        }

        self.current_phase = new_phase;
        self.interval += 1;
    }

    fn write_summary(&mut self, summary: &SpanSummary) {
        let Some(log) = self.dram_log.as_mut() else {
            return;
        };
        if let Err(err) = writeln!(log, "{}", summary.to_log_line()) {
            warn!(
                "DRAM phase log not writable anymore on phase {} at clock {}: {}",
                summary.new_phase, self.clock, err
            );
            // stop trying after the first failure
            self.dram_log = None;
        }
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        if let Some(log) = self.dram_log.as_mut() {
            log.flush()?;
        }
        Ok(())
    }

    pub fn current_phase(&self) -> PhaseId {
        self.current_phase
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn span_latency(&self) -> u64 {
        self.span_latency
    }

    pub fn span_transactions(&self) -> u64 {
        self.span_transactions
    }

    pub fn intervals(&self) -> u64 {
        self.interval
    }

    /// Number of phase changes seen after the first boundary
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    pub fn stats(&self) -> &PhaseStats {
        &self.stats
    }

    /// Hand back the log writer and statistics
    pub fn into_parts(self) -> (Option<W>, PhaseStats) {
        (self.dram_log, self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> RunContext<Vec<u8>> {
        RunContext::new(PendingPolicy::Discard, Some(vec![]))
    }

    fn log_lines(context: RunContext<Vec<u8>>) -> Vec<String> {
        let (log, _) = context.into_parts();
        String::from_utf8(log.unwrap())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn advance_to(context: &mut RunContext<Vec<u8>>, clock: u64) {
        while context.clock() < clock {
            context.tick();
        }
    }

    #[test]
    fn test_latency_of_completed_transaction() {
        let mut ctx = context();
        ctx.on_phase(PhaseId::new(2));

        advance_to(&mut ctx, 10);
        ctx.issue(0xdead_0000);
        advance_to(&mut ctx, 25);
        ctx.on_transaction_complete(0xdead_0000);

        assert_eq!(ctx.span_latency(), 15);
        assert_eq!(ctx.span_transactions(), 1);
        assert_eq!(ctx.pending_len(), 0);
        let data = ctx.stats().get(PhaseId::new(2)).unwrap();
        assert_eq!(data.values("latency"), &[15]);
        assert_eq!(data.counter("transactions"), 1);
    }

    #[test]
    fn test_unknown_completion_is_noop() {
        let mut ctx = context();
        ctx.issue(0x1000);
        advance_to(&mut ctx, 5);
        ctx.on_transaction_complete(0x2000);
        assert_eq!(ctx.span_latency(), 0);
        assert_eq!(ctx.span_transactions(), 0);
        assert_eq!(ctx.pending_len(), 1);
        assert!(ctx.stats().is_empty());

        // a duplicate completion is ignored as well
        ctx.on_transaction_complete(0x1000);
        ctx.on_transaction_complete(0x1000);
        assert_eq!(ctx.span_transactions(), 1);
        assert_eq!(ctx.span_latency(), 5);
    }

    #[test]
    fn test_transition_log_lines() {
        let mut ctx = context();
        // first boundary always starts a span, nothing completed yet
        ctx.on_phase(PhaseId::UNKNOWN);

        ctx.issue(0x40);
        advance_to(&mut ctx, 10);
        ctx.on_transaction_complete(0x40);
        ctx.issue(0x80);
        advance_to(&mut ctx, 30);
        ctx.on_transaction_complete(0x80);

        // repeated phase: no line
        ctx.on_phase(PhaseId::UNKNOWN);
        ctx.on_phase(PhaseId::new(0));
        ctx.on_phase(PhaseId::new(0));
        ctx.on_phase(PhaseId::UNKNOWN);

        assert_eq!(ctx.intervals(), 5);
        assert_eq!(ctx.transitions(), 2);
        let stats = ctx.stats().clone();
        let unknown = stats.get(PhaseId::UNKNOWN).unwrap();
        assert_eq!(unknown.counter("intervals"), 3);
        assert_eq!(unknown.counter("spans"), 1);
        assert_eq!(unknown.values("span_latency"), &[30]);
        assert_eq!(unknown.values("span_transactions"), &[2]);
        assert_eq!(stats.get(PhaseId::new(0)).unwrap().counter("spans"), 1);

        // (10 + 20) / 2 = 15 for the span that ended at interval 2
        assert_eq!(log_lines(ctx), vec!["0,-1,nan", "2,0,15", "4,-1,nan"]);
    }

    #[test]
    fn test_discard_pending_on_transition() {
        let mut ctx = context();
        ctx.on_phase(PhaseId::UNKNOWN);
        ctx.issue(0x1000);
        ctx.on_phase(PhaseId::new(0));
        assert_eq!(ctx.pending_len(), 0);

        advance_to(&mut ctx, 40);
        ctx.on_transaction_complete(0x1000);
        assert_eq!(ctx.span_transactions(), 0);
        assert!(ctx.stats().get(PhaseId::new(0)).unwrap().values("latency").is_empty());
    }

    #[test]
    fn test_pending_kept_without_transition() {
        let mut ctx = context();
        ctx.on_phase(PhaseId::new(1));
        ctx.issue(0x1000);
        ctx.on_phase(PhaseId::new(1));
        assert_eq!(ctx.pending_len(), 1);
    }

    #[test]
    fn test_attribute_to_completion_phase() {
        let mut ctx = RunContext::new(PendingPolicy::AttributeToCompletion, Some(vec![]));
        ctx.on_phase(PhaseId::UNKNOWN);
        ctx.issue(0x1000);
        advance_to(&mut ctx, 7);
        ctx.on_phase(PhaseId::new(0));
        assert_eq!(ctx.pending_len(), 1);

        advance_to(&mut ctx, 12);
        ctx.on_transaction_complete(0x1000);
        assert_eq!(
            ctx.stats().get(PhaseId::new(0)).unwrap().values("latency"),
            &[12]
        );
        assert!(
            ctx.stats()
                .get(PhaseId::UNKNOWN)
                .unwrap()
                .values("latency")
                .is_empty()
        );
    }

    #[test]
    fn test_span_summary_line() {
        let summary = SpanSummary {
            interval: 12,
            new_phase: PhaseId::new(3),
            total_latency: 100,
            transactions: 8,
        };
        assert_eq!(summary.average_access_time(), Some(12.5));
        assert_eq!(summary.to_log_line(), "12,3,12.5");

        let empty = SpanSummary {
            transactions: 0,
            total_latency: 0,
            ..summary
        };
        assert_eq!(empty.average_access_time(), None);
        assert_eq!(empty.to_log_line(), "12,3,nan");
    }

    #[test]
    fn test_without_log() {
        let mut ctx: RunContext<Vec<u8>> = RunContext::new(PendingPolicy::Discard, None);
        ctx.on_phase(PhaseId::UNKNOWN);
        ctx.on_phase(PhaseId::new(0));
        ctx.flush().unwrap();
        let (log, stats) = ctx.into_parts();
        assert!(log.is_none());
        assert_eq!(stats.len(), 2);
    }
}

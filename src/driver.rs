//! Clocked replay of transactions with one transaction in flight from the producer side.
use crate::{
    MemoryEngine, PhaseDetector, PhaseId, PhaseStats, RunConfig, RunContext, TraceSource,
    TransactionSource,
};
use anyhow::bail;
use log::{info, warn};
use std::{
    fs::File,
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplaySummary {
    pub transactions: u64,
    pub cycles: u64,
    /// stopped because `max_transactions` was reached
    pub truncated: bool,
}

/// Everything left once a replay is finished
#[derive(Debug)]
pub struct ReplayOutcome {
    pub instructions: u64,
    pub cycles: u64,
    pub transactions: u64,
    pub phases: usize,
    pub transitions: u64,
    pub phase_trace: Vec<PhaseId>,
    pub stats: PhaseStats,
}

pub struct Replay<E: MemoryEngine, W: Write> {
    engine: E,
    detector: PhaseDetector<RunContext<W>>,
    context: RunContext<W>,
    transactions: u64,
    max_transactions: Option<u64>,
}

impl<E: MemoryEngine, W: Write + 'static> Replay<E, W> {
    pub fn new(config: &RunConfig, engine: E, dram_log: Option<W>) -> anyhow::Result<Self> {
        config.validate()?;
        let mut detector = PhaseDetector::new(config.detector.clone())?;
        detector.register_listener(|context: &mut RunContext<W>, phase| context.on_phase(phase));
        Ok(Self {
            engine,
            detector,
            context: RunContext::new(config.detector.pending_policy, dram_log),
            transactions: 0,
            max_transactions: None,
        })
    }

    /// Stop replaying after this many transactions in total
    pub fn set_max_transactions(&mut self, max_transactions: Option<u64>) {
        self.max_transactions = max_transactions;
    }

    pub fn detector(&self) -> &PhaseDetector<RunContext<W>> {
        &self.detector
    }

    pub fn context(&self) -> &RunContext<W> {
        &self.context
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn transactions(&self) -> u64 {
        self.transactions
    }

    fn limit_reached(&self) -> bool {
        self.max_transactions
            .is_some_and(|max| self.transactions >= max)
    }

    /// Replay one source until it runs dry or the transaction limit is hit
    pub fn replay<S: TransactionSource>(&mut self, source: &mut S) -> anyhow::Result<ReplaySummary> {
        let start_cycle = self.context.clock();
        let mut summary = ReplaySummary::default();

        loop {
            if self.limit_reached() {
                summary.truncated = true;
                break;
            }
            let Some(transaction) = source.next_transaction()? else {
                break;
            };

            self.detector
                .detect(transaction.instruction_pointer, &mut self.context);
            self.context.issue(transaction.virtual_address);

            // keep clocking until the engine takes the transaction
            loop {
                let accepted = self
                    .engine
                    .can_accept_transaction(transaction.virtual_address, transaction.is_write);
                let context = &mut self.context;
                self.engine
                    .advance(&mut |completion| context.on_transaction_complete(completion.address));
                source.on_cycle();
                self.context.tick();
                if accepted {
                    break;
                }
            }

            self.transactions += 1;
            summary.transactions += 1;
        }

        summary.cycles = self.context.clock() - start_cycle;
        Ok(summary)
    }

    /// Write the phase trace log if asked, flush the DRAM log and hand back the results
    pub fn finish(mut self, phase_trace_path: Option<&Path>) -> anyhow::Result<(ReplayOutcome, E)> {
        self.context.flush()?;
        let instructions = self.detector.instruction_count();
        let phases = self.detector.phase_table().len();
        let phase_trace = self.detector.phase_trace().to_vec();
        self.detector.cleanup(phase_trace_path)?;

        let cycles = self.context.clock();
        let transitions = self.context.transitions();
        let (_, stats) = self.context.into_parts();
        Ok((
            ReplayOutcome {
                instructions,
                cycles,
                transactions: self.transactions,
                phases,
                transitions,
                phase_trace,
                stats,
            },
            self.engine,
        ))
    }
}

/// Trace paths listed one per line; blank lines and `#` comments are skipped
pub fn read_trace_list<P: AsRef<Path>>(list_path: P) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = vec![];
    for line in BufReader::new(File::open(list_path)?).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        paths.push(PathBuf::from(line));
    }
    Ok(paths)
}

/// Replay every trace in order through the same detector.
/// Traces that cannot be opened or fail while reading are skipped; at least
/// one must replay to the end. Returns the traces that were fully replayed.
pub fn run_traces<E: MemoryEngine, W: Write + 'static>(
    replay: &mut Replay<E, W>,
    traces: &[PathBuf],
    mut on_progress: impl FnMut(&Path, &ReplaySummary),
) -> anyhow::Result<Vec<PathBuf>> {
    let mut replayed = vec![];
    for path in traces {
        let mut source = match TraceSource::open(path) {
            Ok(source) => source,
            Err(err) => {
                warn!("Skip trace {}: {}", path.display(), err);
                continue;
            }
        };
        info!("Replaying trace {}", path.display());
        let summary = match replay.replay(&mut source) {
            Ok(summary) => summary,
            Err(err) => {
                // records read before the failure have already been fed
                warn!(
                    "Skip rest of trace {} after {} records: {}",
                    path.display(),
                    source.records(),
                    err
                );
                continue;
            }
        };
        info!(
            "Replayed {} transactions in {} cycles from {}",
            summary.transactions,
            summary.cycles,
            path.display()
        );
        on_progress(path, &summary);
        replayed.push(path.clone());
        if summary.truncated {
            info!("Transaction limit reached, stop replaying");
            break;
        }
    }

    if replayed.is_empty() {
        bail!("None of the {} traces could be replayed", traces.len());
    }
    Ok(replayed)
}

/// Read the trace list and replay it, see `run_traces`
pub fn run_trace_list<E: MemoryEngine, W: Write + 'static, P: AsRef<Path>>(
    replay: &mut Replay<E, W>,
    list_path: P,
) -> anyhow::Result<Vec<PathBuf>> {
    let traces = read_trace_list(list_path)?;
    run_traces(replay, &traces, |_, _| {})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Completion, DetectorConfig, MemoryConfig, SimpleMemory, Transaction};
    use std::collections::VecDeque;

    /// Accepts every other offer, completes after a fixed delay
    struct ScriptedEngine {
        offers: u64,
        cycle: u64,
        delay: u64,
        queue: VecDeque<(u64, u64)>,
    }

    impl ScriptedEngine {
        fn new(delay: u64) -> Self {
            Self {
                offers: 0,
                cycle: 0,
                delay,
                queue: VecDeque::new(),
            }
        }
    }

    impl MemoryEngine for ScriptedEngine {
        fn can_accept_transaction(&mut self, address: u64, _is_write: bool) -> bool {
            self.offers += 1;
            if self.offers % 2 == 1 {
                return false;
            }
            self.queue.push_back((self.cycle + self.delay, address));
            true
        }

        fn advance(&mut self, on_complete: &mut dyn FnMut(Completion)) {
            self.cycle += 1;
            while let Some(&(ready, address)) = self.queue.front() {
                if ready > self.cycle {
                    break;
                }
                self.queue.pop_front();
                on_complete(Completion {
                    address,
                    is_write: false,
                });
            }
        }

        fn in_flight(&self) -> usize {
            self.queue.len()
        }
    }

    struct VecSource {
        transactions: VecDeque<Transaction>,
        cycles: u64,
    }

    impl TransactionSource for VecSource {
        fn next_transaction(&mut self) -> anyhow::Result<Option<Transaction>> {
            Ok(self.transactions.pop_front())
        }

        fn on_cycle(&mut self) {
            self.cycles += 1;
        }
    }

    fn source(count: u64) -> VecSource {
        VecSource {
            transactions: (0..count)
                .map(|i| Transaction {
                    instruction_pointer: 0x1000 + (i % 8) * 4,
                    virtual_address: 0x10_0000 + i * 64,
                    is_write: false,
                })
                .collect(),
            cycles: 0,
        }
    }

    fn config(interval_len: u64) -> RunConfig {
        RunConfig {
            detector: DetectorConfig {
                interval_len,
                stable_min: 2,
                ..DetectorConfig::default()
            },
            memory: MemoryConfig::default(),
        }
    }

    #[test]
    fn test_backpressure_clocks_until_accepted() {
        let mut replay: Replay<_, Vec<u8>> =
            Replay::new(&config(1000), ScriptedEngine::new(3), None).unwrap();
        let mut src = source(10);
        let summary = replay.replay(&mut src).unwrap();

        // each transaction is refused once, then accepted
        assert_eq!(summary.transactions, 10);
        assert_eq!(summary.cycles, 20);
        assert_eq!(src.cycles, 20);
        assert_eq!(replay.engine().offers, 20);
        assert!(!summary.truncated);

        // completions: issued at clock 2k, accepted at 2k+1, done 3 cycles later
        // which the context sees at clock 2k+3, a latency of 3
        let stats = replay.context().stats();
        let latencies = stats.get(PhaseId::UNKNOWN).unwrap().values("latency");
        assert!(!latencies.is_empty());
        assert!(latencies.iter().all(|latency| *latency == 3));
    }

    #[test]
    fn test_detector_fed_once_per_transaction() {
        let mut replay: Replay<_, Vec<u8>> = Replay::new(
            &config(10),
            SimpleMemory::new(MemoryConfig::default()),
            Some(vec![]),
        )
        .unwrap();
        replay.replay(&mut source(95)).unwrap();
        assert_eq!(replay.detector().instruction_count(), 95);
        assert_eq!(replay.detector().phase_trace().len(), 9);
        assert_eq!(replay.context().intervals(), 9);
    }

    #[test]
    fn test_max_transactions() {
        let mut replay: Replay<_, Vec<u8>> = Replay::new(
            &config(10),
            SimpleMemory::new(MemoryConfig::default()),
            None,
        )
        .unwrap();
        replay.set_max_transactions(Some(25));
        let summary = replay.replay(&mut source(100)).unwrap();
        assert!(summary.truncated);
        assert_eq!(summary.transactions, 25);

        // the limit is global across sources
        let summary = replay.replay(&mut source(100)).unwrap();
        assert!(summary.truncated);
        assert_eq!(summary.transactions, 0);
    }

    #[test]
    fn test_finish_writes_logs() {
        let dir = tempfile::tempdir().unwrap();
        let phase_path = dir.path().join("phase_trace.csv");

        let mut replay: Replay<_, Vec<u8>> = Replay::new(
            &config(10),
            SimpleMemory::new(MemoryConfig::default()),
            Some(vec![]),
        )
        .unwrap();
        replay.replay(&mut source(80)).unwrap();
        let (outcome, engine) = replay.finish(Some(phase_path.as_path())).unwrap();

        assert_eq!(outcome.instructions, 80);
        assert_eq!(outcome.transactions, 80);
        assert_eq!(outcome.phase_trace.len(), 8);
        assert_eq!(engine.reads, 80);

        // the same 8 instruction pointers every interval: confirmed at the third interval
        let phase_log = std::fs::read_to_string(&phase_path).unwrap();
        let lines: Vec<&str> = phase_log.lines().collect();
        assert_eq!(lines.len(), 8);
        assert_eq!(lines[0], "0,-1");
        assert_eq!(lines[1], "10,-1");
        assert_eq!(lines[2], "20,0");
        assert_eq!(lines[7], "70,0");
        assert_eq!(outcome.phases, 1);
        assert_eq!(outcome.transitions, 1);
    }

    #[test]
    fn test_read_trace_list() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("traces.txt");
        std::fs::write(&list, "a.bin\n\n# comment\n  b.bin.zst  \n").unwrap();
        assert_eq!(
            read_trace_list(&list).unwrap(),
            vec![PathBuf::from("a.bin"), PathBuf::from("b.bin.zst")]
        );
    }

    #[test]
    fn test_run_traces_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.bin");
        let mut writer = crate::TraceWriter::create(&good).unwrap();
        for transaction in source(30).transactions {
            writer.record(&transaction).unwrap();
        }
        writer.finish().unwrap();

        let mut replay: Replay<_, Vec<u8>> = Replay::new(
            &config(10),
            SimpleMemory::new(MemoryConfig::default()),
            None,
        )
        .unwrap();
        let traces = vec![dir.path().join("missing.bin"), good.clone()];
        let mut seen = vec![];
        let replayed = run_traces(&mut replay, &traces, |path, summary| {
            seen.push((path.to_path_buf(), summary.transactions))
        })
        .unwrap();
        assert_eq!(replayed, vec![good.clone()]);
        assert_eq!(seen, vec![(good, 30)]);

        let missing_only = vec![dir.path().join("missing.bin")];
        assert!(run_traces(&mut replay, &missing_only, |_, _| {}).is_err());
    }

    #[test]
    fn test_run_traces_skips_corrupt_trace() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.bin");
        let mut writer = crate::TraceWriter::create(&good).unwrap();
        for transaction in source(30).transactions {
            writer.record(&transaction).unwrap();
        }
        writer.finish().unwrap();

        // a zstd frame cut in half opens fine and fails while decoding
        let bad = dir.path().join("bad.bin.zst");
        let mut writer = crate::TraceWriter::create(&bad).unwrap();
        for transaction in source(3000).transactions {
            writer.record(&transaction).unwrap();
        }
        writer.finish().unwrap();
        let content = std::fs::read(&bad).unwrap();
        std::fs::write(&bad, &content[..content.len() / 2]).unwrap();

        let mut replay: Replay<_, Vec<u8>> = Replay::new(
            &config(10),
            SimpleMemory::new(MemoryConfig::default()),
            Some(vec![]),
        )
        .unwrap();
        let traces = vec![good.clone(), bad.clone()];
        let replayed = run_traces(&mut replay, &traces, |_, _| {}).unwrap();
        assert_eq!(replayed, vec![good]);

        let phase_path = dir.path().join("phase_trace.csv");
        let (outcome, _) = replay.finish(Some(phase_path.as_path())).unwrap();
        assert!(outcome.instructions >= 30);
        let phase_log = std::fs::read_to_string(&phase_path).unwrap();
        assert_eq!(phase_log.lines().count() as u64, outcome.instructions / 10);

        let bad_only = vec![bad];
        let mut replay: Replay<_, Vec<u8>> = Replay::new(
            &config(10),
            SimpleMemory::new(MemoryConfig::default()),
            None,
        )
        .unwrap();
        assert!(run_traces(&mut replay, &bad_only, |_, _| {}).is_err());
    }
}

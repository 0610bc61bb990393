//! Replay memory traces through a memory model and annotate them with program phases
use clap::{Parser, ValueEnum};
use cli_table::{Cell, Table, print_stdout};
use indicatif::ProgressBar;
use log::info;
use phase_detector::{
    DetectResult, PendingPolicy, ProgressSource, RandomSource, RandomSourceConfig, Replay,
    RunConfig, SimpleMemory, StreamSource, get_spinner_style, read_trace_list, run_traces,
};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
};

#[derive(Copy, Clone, ValueEnum)]
enum Source {
    /// Traces from the trace list
    Trace,
    /// Random addresses with rotating code regions
    Random,
    /// Streaming a[i] = b[i] + c[i] kernel
    Stream,
}

#[derive(Copy, Clone, ValueEnum)]
enum Policy {
    /// Forget transactions in flight at a phase change
    Discard,
    /// Attribute in-flight transactions to the phase they complete in
    AttributeToCompletion,
}

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// File listing one trace path per line
    #[arg(short, long)]
    trace_list: Option<PathBuf>,

    /// Trace files, replayed after the ones in the trace list
    #[arg(long)]
    trace: Vec<PathBuf>,

    /// Where transactions come from
    #[arg(short, long, value_enum, default_value = "trace")]
    source: Source,

    /// Seed of the synthetic sources
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Run configuration in json, missing fields use defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Instructions per interval
    #[arg(long)]
    interval_len: Option<u64>,

    /// Similarity threshold in (0, 1]
    #[arg(long)]
    threshold: Option<f64>,

    /// Stable intervals required to confirm a phase
    #[arg(long)]
    stable_min: Option<u32>,

    /// log2 of the signature width in bits
    #[arg(long)]
    log2_signature_len: Option<u32>,

    /// Low address bits ignored by the digest
    #[arg(long)]
    drop_bits: Option<u32>,

    /// Policy for transactions in flight at a phase change
    #[arg(long, value_enum)]
    pending_policy: Option<Policy>,

    /// Stop after this many transactions, required for synthetic sources
    #[arg(short, long)]
    max_transactions: Option<u64>,

    /// Output prefix, e.g.,
    /// phase trace goes to: {output_prefix}-phase-trace.csv,
    /// dram phase log goes to: {output_prefix}-dram-phase.csv,
    /// json goes to: {output_prefix}.json
    #[arg(short, long)]
    output_prefix: String,
}

impl Cli {
    fn run_config(&self) -> anyhow::Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load(path)?,
            None => RunConfig::default(),
        };
        let detector = &mut config.detector;
        if let Some(interval_len) = self.interval_len {
            detector.interval_len = interval_len;
        }
        if let Some(threshold) = self.threshold {
            detector.threshold = threshold;
        }
        if let Some(stable_min) = self.stable_min {
            detector.stable_min = stable_min;
        }
        if let Some(log2_signature_len) = self.log2_signature_len {
            detector.log2_signature_len = log2_signature_len;
        }
        if let Some(drop_bits) = self.drop_bits {
            detector.drop_bits = drop_bits;
        }
        if let Some(policy) = self.pending_policy {
            detector.pending_policy = match policy {
                Policy::Discard => PendingPolicy::Discard,
                Policy::AttributeToCompletion => PendingPolicy::AttributeToCompletion,
            };
        }
        config.validate()?;
        Ok(config)
    }
}

/// Returns the traces replayed, empty for synthetic sources
fn replay_source<W: Write + 'static>(
    args: &Cli,
    replay: &mut Replay<SimpleMemory, W>,
    pbar: &ProgressBar,
) -> anyhow::Result<Vec<PathBuf>> {
    match args.source {
        Source::Trace => {
            let mut traces = match &args.trace_list {
                Some(list) => read_trace_list(list)?,
                None => vec![],
            };
            traces.extend(args.trace.iter().cloned());
            println!("Replaying {} traces", traces.len());
            run_traces(replay, &traces, |path, summary| {
                pbar.inc(summary.transactions);
                pbar.set_message(format!("{}", path.display()));
            })
        }
        Source::Random | Source::Stream => {
            let Some(max_transactions) = args.max_transactions else {
                anyhow::bail!("Synthetic sources need --max-transactions");
            };
            println!("Generating {} synthetic transactions", max_transactions);
            if let Source::Random = args.source {
                let source = RandomSource::new(RandomSourceConfig {
                    seed: args.seed,
                    ..RandomSourceConfig::default()
                });
                replay.replay(&mut ProgressSource::new(source, pbar))?;
            } else {
                let source = StreamSource::new(args.seed);
                replay.replay(&mut ProgressSource::new(source, pbar))?;
            }
            Ok(vec![])
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Cli::parse();
    let config = args.run_config()?;

    let phase_trace_path = PathBuf::from(format!("{}-phase-trace.csv", args.output_prefix));
    let dram_log_path = PathBuf::from(format!("{}-dram-phase.csv", args.output_prefix));
    let json_path = PathBuf::from(format!("{}.json", args.output_prefix));

    let dram_log = BufWriter::new(File::create(&dram_log_path)?);
    let mut replay = Replay::new(&config, SimpleMemory::new(config.memory.clone()), Some(dram_log))?;
    replay.set_max_transactions(args.max_transactions);

    let pbar = ProgressBar::new_spinner();
    pbar.set_style(get_spinner_style());
    let replayed = replay_source(&args, &mut replay, &pbar);
    pbar.finish();

    // the logs are written even if the replay failed
    let (outcome, memory) = replay.finish(Some(phase_trace_path.as_path()))?;
    let trace_paths = replayed?;
    info!(
        "Memory saw {} reads, {} writes, {} row hits, {} row misses",
        memory.reads, memory.writes, memory.row_hits, memory.row_misses
    );
    println!(
        "Replayed {} instructions in {} cycles, found {} phases with {} transitions",
        outcome.instructions, outcome.cycles, outcome.phases, outcome.transitions
    );
    println!("Phase trace written to {}", phase_trace_path.display());
    println!("DRAM phase log written to {}", dram_log_path.display());

    let result = DetectResult::new(
        trace_paths,
        config,
        outcome,
        Some(phase_trace_path),
        Some(dram_log_path),
    );
    result.save(&json_path)?;
    println!("Result written to {}", json_path.display());

    let mut table = vec![];
    for (phase, data) in result.stats.iter() {
        table.push(vec![
            phase.cell(),
            data.counter("intervals").cell(),
            data.counter("spans").cell(),
            data.counter("transactions").cell(),
            match data.mean("latency") {
                Some(latency) => format!("{:.2}", latency),
                None => "-".to_string(),
            }
            .cell(),
        ]);
    }
    let table = table.table().title(vec![
        "Phase".cell(),
        "Intervals".cell(),
        "Spans".cell(),
        "Transactions".cell(),
        "Mean Latency".cell(),
    ]);
    print_stdout(table)?;

    Ok(())
}

//! Synthesize a binary trace file from one of the built-in transaction sources
use clap::{Parser, ValueEnum};
use phase_detector::{
    RandomSource, RandomSourceConfig, StreamSource, TraceWriter, TransactionSource,
    get_tqdm_style,
};
use std::path::PathBuf;

#[derive(Copy, Clone, ValueEnum)]
enum Source {
    /// Random addresses with rotating code regions
    Random,
    /// Streaming a[i] = b[i] + c[i] kernel
    Stream,
}

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Which generator to use
    #[arg(short, long, value_enum)]
    source: Source,

    /// Number of records to write
    #[arg(short, long)]
    count: u64,

    /// Generator seed
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Code regions of the random source
    #[arg(long, default_value = "4")]
    regions: u64,

    /// Records per code region of the random source
    #[arg(long, default_value = "200000")]
    region_span: u64,

    /// Path to trace file, compressed with zstd if it ends with .zst
    #[arg(short, long)]
    output_path: PathBuf,
}

fn write_records<S: TransactionSource>(
    source: &mut S,
    writer: &mut TraceWriter,
    count: u64,
) -> anyhow::Result<()> {
    let pbar = indicatif::ProgressBar::new(count);
    pbar.set_style(get_tqdm_style("records"));
    for _ in 0..count {
        let Some(transaction) = source.next_transaction()? else {
            break;
        };
        writer.record(&transaction)?;
        pbar.inc(1);
    }
    pbar.finish();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Cli::parse();

    println!("Writing to trace file at {}", args.output_path.display());
    let mut writer = TraceWriter::create(&args.output_path)?;
    match args.source {
        Source::Random => write_records(
            &mut RandomSource::new(RandomSourceConfig {
                seed: args.seed,
                regions: args.regions,
                region_span: args.region_span,
                ..RandomSourceConfig::default()
            }),
            &mut writer,
            args.count,
        )?,
        Source::Stream => write_records(&mut StreamSource::new(args.seed), &mut writer, args.count)?,
    }
    let records = writer.finish()?;
    println!("Wrote {} records", records);

    Ok(())
}

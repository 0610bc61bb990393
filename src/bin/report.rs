//! Print per-phase statistics of one or more detection results
use clap::Parser;
use cli_table::{Cell, Table, print_stdout};
use phase_detector::DetectResult;
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Result json paths written by detect
    #[arg(short, long)]
    result_path: Vec<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Cli::parse();

    let mut summary = vec![];
    for input_file in &args.result_path {
        println!("Loading detection result from {}", input_file.display());
        let result = DetectResult::load(input_file)?;
        println!(
            "Generated at {} with interval length {}, threshold {}, stable min {}",
            result.generated_at,
            result.config.detector.interval_len,
            result.config.detector.threshold,
            result.config.detector.stable_min
        );

        let total_intervals = result
            .stats
            .iter()
            .map(|(_, data)| data.counter("intervals"))
            .sum::<u64>()
            .max(1);

        let mut table = vec![];
        for (phase, data) in result.stats.iter() {
            let intervals = data.counter("intervals");
            // mean of the per-span averages, skipping spans without transactions
            let span_latency = data.values("span_latency");
            let span_transactions = data.values("span_transactions");
            let span_averages: Vec<f64> = span_latency
                .iter()
                .zip(span_transactions)
                .filter(|(_, transactions)| **transactions > 0)
                .map(|(latency, transactions)| *latency as f64 / *transactions as f64)
                .collect();

            table.push(vec![
                phase.cell(),
                intervals.cell(),
                format!("{:.2} %", intervals as f64 * 100.0 / total_intervals as f64).cell(),
                data.counter("transactions").cell(),
                match data.mean("latency") {
                    Some(latency) => format!("{:.2}", latency),
                    None => "-".to_string(),
                }
                .cell(),
                if span_averages.is_empty() {
                    "-".to_string()
                } else {
                    format!(
                        "{:.2}",
                        span_averages.iter().sum::<f64>() / span_averages.len() as f64
                    )
                }
                .cell(),
            ]);
        }
        let table = table.table().title(vec![
            "Phase".cell(),
            "Intervals".cell(),
            "Coverage".cell(),
            "Transactions".cell(),
            "Mean Latency".cell(),
            "Mean Span AAT".cell(),
        ]);
        print_stdout(table)?;

        summary.push(vec![
            input_file
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_default()
                .cell(),
            result.instructions.cell(),
            result.phases.cell(),
            result.transitions.cell(),
            format!(
                "{:.2} %",
                result.unknown_intervals as f64 * 100.0 / total_intervals as f64
            )
            .cell(),
            match result.average_latency() {
                Some(latency) => format!("{:.2}", latency),
                None => "-".to_string(),
            }
            .cell(),
        ]);
    }

    let table = summary.table().title(vec![
        "Name".cell(),
        "Instructions".cell(),
        "Phases".cell(),
        "Transitions".cell(),
        "Unknown".cell(),
        "Mean Latency".cell(),
    ]);
    print_stdout(table)?;

    Ok(())
}

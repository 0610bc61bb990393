use clap::Parser;
use cli_table::{Cell, Table, print_stdout};
use phase_detector::{DetectorConfig, SignatureDigest, TraceReader};
use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to trace file
    trace: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Cli::parse();
    let reader = TraceReader::open(&args.trace)?;

    // how much of the default signature the trace would light up
    let digest = SignatureDigest::from_config(&DetectorConfig::default())?;
    let mut signature_bits = HashSet::new();

    let mut records = 0u64;
    let mut writes = 0u64;
    let mut ip_counts: HashMap<u64, u64> = HashMap::new();
    let mut lines = HashSet::new();
    for record in reader {
        let record = record?;
        records += 1;
        writes += record.is_write as u64;
        *ip_counts.entry(record.instruction_pointer).or_default() += 1;
        lines.insert(record.virtual_address >> 6);
        signature_bits.insert(digest.hash_address(record.instruction_pointer));
    }

    println!("Got {records} records");
    println!(
        "- writes: {} ({:.2} %)",
        writes,
        writes as f64 * 100.0 / records.max(1) as f64
    );
    println!("- distinct instruction pointers: {}", ip_counts.len());
    println!("- distinct cache lines: {}", lines.len());
    println!(
        "- default signature bits touched: {}/{}",
        signature_bits.len(),
        digest.signature_len()
    );

    println!("Top instructions by access count:");
    let mut items: Vec<(&u64, &u64)> = ip_counts.iter().collect();
    items.sort_by_key(|(_, count)| **count);
    let mut table = vec![];
    for (ip, count) in items.iter().rev().take(10) {
        table.push(vec![
            format!("0x{:08x}", ip).cell(),
            count.cell(),
            format!("{:.2}", **count as f64 * 100.0 / records as f64).cell(),
        ]);
    }
    let table = table.table().title(vec![
        "Instruction PC".cell(),
        "Access Count".cell(),
        "Share (%)".cell(),
    ]);
    print_stdout(table)?;

    Ok(())
}

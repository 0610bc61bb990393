use crate::{Transaction, TransactionSource};
use indicatif::{ProgressBar, ProgressState, ProgressStyle};

/// `{custom_per_sec}` key rendering the rate with its unit
fn per_sec(
    unit: &'static str,
) -> impl Fn(&ProgressState, &mut dyn std::fmt::Write) + Send + Sync + Clone + 'static {
    move |state: &ProgressState, w: &mut dyn std::fmt::Write| {
        let _ = write!(w, "{:.2} {}/s", state.per_sec(), unit);
    }
}

/// tqdm-like bar for runs of known length, counting `unit`s
pub fn get_tqdm_style(unit: &'static str) -> ProgressStyle {
    ProgressStyle::with_template(
        "{percent:>3}% |{wide_bar}| {pos}/{len} [{elapsed_precise}<{eta_precise}, {custom_per_sec}]",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .with_key("custom_per_sec", per_sec(unit))
    .progress_chars("██ ")
}

/// Style for runs of unknown length, e.g. replaying a list of traces
pub fn get_spinner_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner} {pos} transactions [{elapsed_precise}, {custom_per_sec}] {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_spinner())
    .with_key("custom_per_sec", per_sec("tx"))
}

/// Advances a progress bar by one for every transaction drawn from `source`
pub struct ProgressSource<'a, S> {
    source: S,
    pbar: &'a ProgressBar,
}

impl<'a, S: TransactionSource> ProgressSource<'a, S> {
    pub fn new(source: S, pbar: &'a ProgressBar) -> Self {
        Self { source, pbar }
    }
}

impl<S: TransactionSource> TransactionSource for ProgressSource<'_, S> {
    fn next_transaction(&mut self) -> anyhow::Result<Option<Transaction>> {
        let transaction = self.source.next_transaction()?;
        if transaction.is_some() {
            self.pbar.inc(1);
        }
        Ok(transaction)
    }

    fn on_cycle(&mut self) {
        self.source.on_cycle();
    }
}

//! Progress bar and summary reporting for CLI runs.

use indicatif::{ProgressBar, ProgressStyle};

use crate::retry::PageOutcome;
use crate::stats::{ChannelStats, RunStats};
use crate::types::{ChannelInfo, PageNumber};
use crate::{RunProgress, format_bytes, format_duration};

const SEPARATOR: &str = "────────────────────────────────────────────────────────────";

/// Channel-level progress bar.
pub struct ConsoleProgress {
    bar: ProgressBar,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} channel(s) {elapsed} - {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━━╌"),
        );
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl RunProgress for ConsoleProgress {
    fn on_channels(&self, channels: &[ChannelInfo]) {
        self.bar.set_length(channels.len() as u64);
        self.bar.enable_steady_tick(std::time::Duration::from_millis(250));
    }

    fn on_channel_start(&self, channel: &ChannelInfo, pages: PageNumber) {
        self.bar
            .set_message(format!("{}: {pages} page(s)", channel.label));
    }

    fn on_page_finished(&self, outcome: &PageOutcome) {
        let status = if outcome.is_done() { "done" } else { "abandoned" };
        self.bar.set_message(format!(
            "channel {} page {} {status}, {} saved",
            outcome.channel, outcome.page, outcome.tally.saved
        ));
    }

    fn on_channel_finished(&self, _stats: &ChannelStats) {
        self.bar.inc(1);
    }
}

/// Prints a summary of the run.
pub fn print_summary(stats: &RunStats) {
    let totals = stats.totals();

    println!("\n{SEPARATOR}");
    println!("Run Summary for {}", stats.date);
    println!("{SEPARATOR}");

    for channel in &stats.channels {
        match &channel.error {
            Some(error) => println!("  {:<24} skipped: {error}", channel.label),
            None => println!(
                "  {:<24} {}/{} page(s), {} saved, {} skipped, {} failed",
                channel.label,
                channel.pages_done,
                channel.pages_total,
                channel.tally.saved,
                channel.tally.skipped,
                channel.tally.failed
            ),
        }
    }

    println!("{SEPARATOR}");
    println!(
        "  Pages:             {} done, {} abandoned",
        stats.pages_done(),
        stats.pages_abandoned()
    );
    println!(
        "  Files saved:       {} ({})",
        totals.saved,
        format_bytes(totals.bytes)
    );
    if totals.skipped > 0 {
        println!("  Already retrieved: {}", totals.skipped);
    }
    if totals.failed > 0 {
        println!("  Failed:            {}", totals.failed);
    }
    if totals.unparsable > 0 {
        println!("  Unparsable:        {} (left in landing directory)", totals.unparsable);
    }
    println!("  Total time:        {}", format_duration(stats.elapsed));
    if totals.bytes > 0 {
        println!(
            "  Average speed:     {}/s",
            format_bytes(stats.average_speed())
        );
    }
    if stats.cancelled {
        println!("  Interrupted before completion.");
    }
    println!("{SEPARATOR}");
}

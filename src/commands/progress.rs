//! Progress reporting with indicatif

use flashdiff_core::flash::{WriteProgress, WriteStats};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Create a progress bar with custom phase message
fn create_progress_bar_with_phase(total: u64, phase: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template(&format!(
            "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{bytes}}/{{total_bytes}} ({{bytes_per_sec}}, {{eta}}) {}",
            phase
        ))
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

/// Progress reporter using indicatif progress bars
pub struct IndicatifProgress {
    multi: MultiProgress,
    current_bar: Option<ProgressBar>,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            current_bar: None,
        }
    }

    fn create_bar(&mut self, total: u64, phase: &str) {
        self.finish();
        let pb = self.multi.add(create_progress_bar_with_phase(total, phase));
        self.current_bar = Some(pb);
    }

    fn set_position(&self, pos: usize) {
        if let Some(pb) = &self.current_bar {
            pb.set_position(pos as u64);
        }
    }

    fn finish(&mut self) {
        if let Some(pb) = self.current_bar.take() {
            pb.finish();
        }
    }
}

impl Default for IndicatifProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteProgress for IndicatifProgress {
    fn reading(&mut self, total_bytes: usize) {
        self.create_bar(total_bytes as u64, "Reading");
    }

    fn read_progress(&mut self, bytes_read: usize) {
        self.set_position(bytes_read);
    }

    fn executing(&mut self, units: usize, total_bytes: usize) {
        self.create_bar(total_bytes as u64, &format!("Erasing/writing {} units", units));
    }

    fn block_done(&mut self, bytes_done: usize) {
        self.set_position(bytes_done);
    }

    fn verifying(&mut self, total_bytes: usize) {
        // Verification reads in one go, so the bar only marks the phase
        self.create_bar(total_bytes as u64, "Verifying");
    }

    fn complete(&mut self, stats: &WriteStats) {
        self.finish();
        print_stats(stats);
    }
}

/// Print the summary line for a write or erase
pub fn print_stats(stats: &WriteStats) {
    if stats.units == 0 {
        println!("Flash already contains the desired data - no changes needed");
        return;
    }
    println!(
        "Smart write: {} bytes changed, {} blocks erased ({} bytes), {} writes ({} bytes)",
        stats.bytes_changed,
        stats.erases_performed,
        stats.bytes_erased,
        stats.writes_performed,
        stats.bytes_written
    );
    if stats.blocks_denied > 0 {
        println!(
            "Skipped {} protected block(s), their contents were left as they were",
            stats.blocks_denied
        );
    }
    if stats.verified {
        println!("Verified");
    }
}

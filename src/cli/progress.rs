//! Progress bar over input bytes while parsing

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

const TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({percent}%) {bytes_per_sec} ETA: {eta}";

/// Bar sized to the input file, drawn on stderr
pub fn create_progress_bar(total_bytes: u64) -> ProgressBar {
    let style = ProgressStyle::with_template(TEMPLATE)
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    let pb = ProgressBar::with_draw_target(Some(total_bytes), ProgressDrawTarget::stderr());
    pb.set_style(style);
    pb
}

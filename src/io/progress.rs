//! Progress display while generated images are scored

use crate::io::configuration::PROGRESS_BAR_WIDTH;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::LazyLock;

static SCORING_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template(&format!(
            "[{{elapsed_precise}}] Scoring: [{{bar:{PROGRESS_BAR_WIDTH}.cyan/blue}}] {{pos}}/{{len}} {{msg}}"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏ ")
});

/// Single bar counting scored variations
///
/// Hidden bars still count, so callers never branch on visibility.
pub struct ScoringProgress {
    bar: ProgressBar,
}

impl ScoringProgress {
    /// Create a bar for `total` variations
    pub fn new(total: usize, visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new(total as u64)
        } else {
            ProgressBar::hidden()
        };
        bar.set_length(total as u64);
        bar.set_style(SCORING_STYLE.clone());
        Self { bar }
    }

    /// Record that the variation at `index` finished
    pub fn record(&self, index: usize) {
        self.bar.inc(1);
        self.bar.set_message(format!("#{index}"));
    }

    /// Variations recorded so far
    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    /// Close the bar with a summary
    pub fn finish(&self, scored: usize, failed: usize) {
        self.bar
            .finish_with_message(format!("{scored} scored, {failed} excluded"));
    }
}

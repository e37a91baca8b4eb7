//! Spinner shown while nodes are launched and initialized

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Steady-ticking spinner on stderr. Hidden automatically when stderr is not
/// a terminal, so scripted runs see only the final banner.
#[must_use]
pub fn spinner(message: impl Into<String>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg} [{elapsed}]") {
        spinner.set_style(style);
    }
    spinner.set_message(message.into());
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

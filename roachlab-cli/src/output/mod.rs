//! Output formatting utilities for CLI

pub mod progress;
pub mod table;

pub use progress::spinner;
pub use table::{TableBuilder, format_bytes};

//! Terminal output for check runs

mod progress;

pub use progress::{render_line, ProgressReporter};

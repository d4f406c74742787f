//! Console output policy
//!
//! The CLI runs in one of three output modes: normal console output,
//! quiet (results and errors only), or JSON (stdout carries a single
//! machine-readable document). Status lines, progress bars and error
//! printing all consult the active mode here, so the policy lives in one
//! place instead of being re-decided at every call site.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::RagError;

/// How much the CLI is allowed to say on the console
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Status lines, progress bars and results
    Console,
    /// Results and errors only
    Quiet,
    /// A single JSON document on stdout; status output is suppressed
    Json,
}

static MODE: AtomicU8 = AtomicU8::new(0);

pub fn set_mode(mode: OutputMode) {
    let raw = match mode {
        OutputMode::Console => 0,
        OutputMode::Quiet => 1,
        OutputMode::Json => 2,
    };
    MODE.store(raw, Ordering::SeqCst);
}

pub fn mode() -> OutputMode {
    match MODE.load(Ordering::SeqCst) {
        1 => OutputMode::Quiet,
        2 => OutputMode::Json,
        _ => OutputMode::Console,
    }
}

/// True when status output is suppressed (quiet or JSON mode)
pub fn is_quiet() -> bool {
    mode() != OutputMode::Console
}

/// Print a user-facing status line, subject to the active mode
pub fn print_status(args: std::fmt::Arguments<'_>) {
    if !is_quiet() {
        println!("{args}");
    }
}

/// Errors reach stderr in every mode; JSON consumers read stdout and
/// still deserve a diagnosable failure on the other stream.
pub fn print_error(error: &RagError) {
    eprintln!("❌ {error}");
}

/// Progress bar for multi-file operations. Hidden outside console mode so
/// quiet and JSON runs stay clean.
pub fn progress_bar(len: u64) -> ProgressBar {
    if is_quiet() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}

/// Print a status line subject to the active output mode
#[macro_export]
macro_rules! status_print {
    ($($arg:tt)*) => {
        $crate::output::print_status(format_args!($($arg)*));
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_round_trip_and_quiet_flag() {
        set_mode(OutputMode::Quiet);
        assert_eq!(mode(), OutputMode::Quiet);
        assert!(is_quiet());

        set_mode(OutputMode::Json);
        assert!(is_quiet());
        assert!(progress_bar(10).is_hidden());

        set_mode(OutputMode::Console);
        assert_eq!(mode(), OutputMode::Console);
        assert!(!is_quiet());
    }
}

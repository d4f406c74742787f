use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use raglite::{cli, constants, output};

/// Log level for the stderr layer, read ahead of clap so tracing exists
/// before argument parsing can fail.
fn requested_log_level(argv: &[String]) -> String {
    argv.windows(2)
        .find(|pair| pair[0] == "-l" || pair[0] == "--loglevel")
        .map(|pair| pair[1].clone())
        .unwrap_or_else(|| "info".to_string())
}

/// Quiet and JSON runs keep the console free of log noise entirely.
fn console_silenced(argv: &[String]) -> bool {
    argv.iter()
        .any(|a| a == "-q" || a == "--quiet" || a == "--json")
}

#[tokio::main]
async fn main() {
    let argv: Vec<String> = std::env::args().collect();
    let silenced = console_silenced(&argv);

    // Long-running ingests watch this token between files.
    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();

    // One interrupt asks for an orderly stop: the current file finishes,
    // the index is saved, cleanup runs. A repeated interrupt stops the
    // process cold; the last saved index stays authoritative.
    ctrlc::set_handler(move || {
        if constants::SHUTDOWN_REQUESTED.swap(true, Ordering::SeqCst) {
            eprintln!("\nStopping immediately. The last saved index remains authoritative.");
            std::process::exit(130);
        }
        if !silenced {
            eprintln!(
                "\nInterrupt received: finishing the current file, then saving. \
                 Press Ctrl-C again to stop immediately."
            );
        }
        shutdown_signal.cancel();
    })
    .expect("signal handler installation failed");

    if !silenced {
        // Logs go to stderr; stdout belongs to search results and JSON.
        let level = requested_log_level(&argv);
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| format!("raglite={level}").into()),
            )
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    if let Err(e) = cli::run(shutdown).await {
        output::print_error(&e);
        std::process::exit(e.exit_code());
    }
}

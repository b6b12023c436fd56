//! Wires policy, sandbox, redaction, file service, write managers, process
//! runner, and confirmation center into a `Dispatcher`, then serves it over
//! a line-delimited JSON-RPC loop on stdio (`spec.md` §1, §6).

mod app;
mod cli;
mod stdio_loop;

pub use app::build_dispatcher;
pub use cli::Cli;
pub use stdio_loop::run_stdio_loop;

use std::io::BufReader;

/// Initialize `tracing_subscriber` from `cli.log_level`, build the
/// dispatcher from `cli.config_dir`, and serve it over stdin/stdout until
/// EOF. Mirrors the teacher's `mcp-server::run_main` entry point, collapsed
/// to a synchronous loop since every FlyCode component here is synchronous.
pub fn run_main(cli: Cli) -> flycode_errors::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::new(cli.log_level.clone()))
        .init();

    let config_dir = cli.resolve_config_dir();
    tracing::info!(config_dir = %config_dir.display(), "starting flycode-daemon");

    let dispatcher = build_dispatcher(&config_dir)?;

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    run_stdio_loop(&dispatcher, BufReader::new(stdin.lock()), stdout.lock());

    Ok(())
}

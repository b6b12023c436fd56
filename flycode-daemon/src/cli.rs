use std::path::PathBuf;

use clap::Parser;

/// FlyCode daemon.
///
/// Wires the policy/sandbox/redaction/file/write/process/confirmation
/// components into a single `Dispatcher` and serves it over a
/// line-delimited JSON-RPC loop on stdio. The real loopback/HTTP
/// transport, bearer-token handshake, and site pairing are out of scope
/// here; this binary is the thinnest stand-in that can still drive the
/// dispatcher end to end.
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Cli {
    /// Directory holding `policy.yaml`, `app-config.json`, and the
    /// audit/console JSONL sinks. Defaults to the platform config dir.
    #[clap(long)]
    pub config_dir: Option<PathBuf>,

    /// Log level passed to `tracing_subscriber`'s `EnvFilter` (e.g.
    /// `info`, `debug`, `flycode_mcp=trace`). Defaults to `info`.
    #[clap(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn resolve_config_dir(&self) -> PathBuf {
        self.config_dir.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("flycode")
        })
    }
}

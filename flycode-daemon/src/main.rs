use clap::Parser;
use flycode_daemon::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    flycode_daemon::run_main(cli).map_err(|e| anyhow::anyhow!(e.message()))
}

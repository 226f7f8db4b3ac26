use bridgesyncd::daemon::{DaemonConfig, DaemonRuntime};
use bridgesyncd::logging;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Once,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CliArgs {
    mode: CliMode,
    dry_run: bool,
}

fn parse_cli_args<I>(args: I) -> anyhow::Result<CliArgs>
where
    I: IntoIterator<Item = String>,
{
    let mut parsed = CliArgs {
        mode: CliMode::Run,
        dry_run: false,
    };
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--once" => parsed.mode = CliMode::Once,
            "--dry-run" => parsed.dry_run = true,
            "--help" | "-h" => parsed.mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = parse_cli_args(std::env::args())?;
    if args.mode == CliMode::Help {
        println!("Usage: bridgesyncd [--once] [--dry-run]");
        println!("  --once      Run a single sync over every container and exit");
        println!("  --dry-run   Log the changes a sync would make without writing anything");
        return Ok(());
    }
    logging::init();

    let mut config = DaemonConfig::from_env()?;
    config.dry_run |= args.dry_run;
    let daemon = DaemonRuntime::bootstrap(config).await?;
    match args.mode {
        CliMode::Once => {
            let report = daemon.run_once(&CancellationToken::new()).await?;
            if !report.is_success() {
                anyhow::bail!("sync finished with failures: {report}");
            }
            Ok(())
        }
        _ => daemon.run().await,
    }
}

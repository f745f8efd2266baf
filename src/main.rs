use anyhow::Result;
use clap::Parser;
use raven_pipeline::{Config, ServiceOptions, StageSelection};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "raven-pipeline", about = "Voice assistant stream pipeline")]
struct Cli {
    /// Path to a config file (TOML/YAML/JSON); defaults apply without one
    #[arg(short, long)]
    config: Option<String>,

    /// Which pipeline stages to run in this process
    #[arg(long, value_enum, default_value = "all")]
    stage: StageSelection,

    /// Consumer name within the group; defaults to a per-process name
    #[arg(long)]
    consumer_name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(cli.config.as_deref())?;
    cfg.log_summary();

    let consumer_name = cli
        .consumer_name
        .unwrap_or_else(|| format!("consumer-{}", std::process::id()));

    raven_pipeline::service::run(
        cfg,
        ServiceOptions {
            stage: cli.stage,
            consumer_name,
        },
    )
    .await
}

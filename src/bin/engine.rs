use std::str::FromStr;

use clap::Parser;
use stackwatch::{
    Engine,
    config::read_config_file,
    engine::apply_env_overrides,
    util::get_config_file,
};
use tracing::{level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file; falls back to $STACKWATCH_CONFIG
    #[arg(short, long)]
    file: Option<String>,

    /// Log level of the engine (trace, debug, info, warn, error)
    #[arg(long, default_value = "trace")]
    log_level: String,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_targets(vec![
        ("stackwatch", level),
        ("stackwatch_engine", level),
        ("bi", LevelFilter::INFO),
        ("metrics", LevelFilter::INFO),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let level = LevelFilter::from_str(&args.log_level)
        .map_err(|e| anyhow::anyhow!("invalid log level '{}': {e}", args.log_level))?;
    init(level);
    trace!("started with args: {args:?}");

    let path = args.file.clone().unwrap_or_else(get_config_file);
    let mut config = read_config_file(&path)?;
    apply_env_overrides(&mut config);

    Engine::from_config(config)?.run().await
}

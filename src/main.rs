use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use loggy::{Config, SinkFormat, StdoutSink};

#[derive(Parser)]
#[command(name = "loggy", about = "Loggy — tail container log files into one stream")]
struct Cli {
    /// TOML config file layered over the built-in defaults.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Directory holding the log files.
    #[arg(long, short)]
    directory: Option<PathBuf>,

    /// File-name pattern to tail. Repeat to add more; replaces the configured list.
    #[arg(long)]
    include: Vec<String>,

    /// File-name pattern to skip. Repeat to add more; replaces the configured list.
    #[arg(long)]
    exclude: Vec<String>,

    /// Output format for records printed on stdout.
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,

    /// Log engine internals at debug level (stderr). `RUST_LOG` wins if set.
    #[arg(long)]
    debug: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

impl From<OutputFormat> for SinkFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Text => SinkFormat::Text,
            OutputFormat::Json => SinkFormat::Json,
        }
    }
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(directory) = self.directory {
            config.discovery.directory = directory;
        }
        if !self.include.is_empty() {
            config.discovery.include = self.include;
        }
        if !self.exclude.is_empty() {
            config.discovery.exclude = self.exclude;
        }
        if let Some(format) = self.format {
            config.sink.format = format.into();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    cli.apply(&mut config);
    config.validate().context("validating configuration")?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for Ctrl-C");
                return;
            }
            tracing::info!("shutdown requested");
            shutdown.cancel();
        }
    });

    let sink = StdoutSink::stdout(config.sink.format);
    loggy::run(config, sink, shutdown).await?;
    Ok(())
}

use anyhow::Result;
use clap::{Parser, Subcommand};
use citadel_core::config::{CitadelConfig, ConfigLoader};
use log::LevelFilter;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

mod commands;

#[derive(Parser, Debug)]
#[clap(name = "citadel", author, version = "0.1.0", about = "Citadel multi-language code runner")]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(long, short, help = "YAML configuration file; defaults plus environment overrides when omitted")]
    config: Option<PathBuf>,

    #[clap(long, short, help = "Log level, overriding the configured one")]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a snippet and print the node output as JSON
    Run {
        #[clap(long, short, help = "Language or alias, e.g. python, js, golang, c#")]
        language: String,

        #[clap(long, conflicts_with = "file", required_unless_present = "file")]
        code: Option<String>,

        #[clap(long, short, help = "Read the snippet from a file")]
        file: Option<PathBuf>,

        #[clap(long, short, help = "JSON object passed to the snippet as inputs")]
        input: Option<String>,

        #[clap(long, short, help = "Timeout in seconds")]
        timeout: Option<u64>,
    },
    /// Probe every toolchain and list runtime status
    Runtimes,
    /// Talk to node plugin binaries
    Plugin {
        #[clap(subcommand)]
        action: PluginCommands,
    },
}

#[derive(Subcommand, Debug)]
enum PluginCommands {
    /// Print a plugin's metadata and config schema
    Info { path: PathBuf },
    /// Execute a plugin once
    Exec {
        path: PathBuf,

        #[clap(long, short, help = "JSON object passed to the plugin")]
        input: Option<String>,
    },
    /// Register the plugins listed in the configuration and print their metadata
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::from_file(path).await?,
        None => ConfigLoader::from_env_overrides().await?,
    };

    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(config.logging.level.as_str())
        .parse()
        .unwrap_or(LevelFilter::Info);
    env_logger::Builder::new().filter_level(level).init();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    run(cli.command, config, cancel).await
}

async fn run(command: Commands, config: CitadelConfig, cancel: CancellationToken) -> Result<()> {
    match command {
        Commands::Run {
            language,
            code,
            file,
            input,
            timeout,
        } => {
            let code = match (code, file) {
                (Some(code), _) => code,
                (None, Some(file)) => tokio::fs::read_to_string(&file)
                    .await
                    .map_err(|e| anyhow::anyhow!("failed to read {}: {}", file.display(), e))?,
                (None, None) => anyhow::bail!("either --code or --file is required"),
            };
            let inputs = commands::parse_inputs(input.as_deref())?;
            commands::run_snippet(&config, &cancel, &language, &code, inputs, timeout).await
        }
        Commands::Runtimes => commands::list_runtimes(&config).await,
        Commands::Plugin { action } => match action {
            PluginCommands::Info { path } => commands::plugin_info(&config, &path).await,
            PluginCommands::Exec { path, input } => {
                let inputs = commands::parse_inputs(input.as_deref())?;
                commands::plugin_exec(&config, &cancel, &path, inputs).await
            }
            PluginCommands::List => commands::plugin_list(&config).await,
        },
    }
}

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use tuneport::config::file::load_config_file;
use tuneport::plugins::InstallOptions;
use tuneport::services::MediaType;
use tuneport::{Config, Envelope, ImportKind, PluginHost, SearchOptions};

/// Tuneport - plugin runtime for a music player
#[derive(Parser)]
#[command(name = "tuneport", version, about)]
struct Cli {
    /// Data directory (plugins and database live here)
    #[arg(long, env = "TUNEPORT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List installed plugins
    List,
    /// Install a plugin from a file path or URL
    Install {
        /// Local path or http(s) URL
        source: String,
        /// Accept an older version over a newer installed one
        #[arg(long)]
        force: bool,
    },
    /// Uninstall a plugin by hash
    Uninstall {
        /// Plugin hash
        hash: String,
    },
    /// Uninstall every plugin
    UninstallAll,
    /// Re-fetch a plugin from its update source
    Update {
        /// Plugin hash
        hash: String,
    },
    /// Enable a plugin
    Enable {
        /// Plugin name
        name: String,
    },
    /// Disable a plugin
    Disable {
        /// Plugin name
        name: String,
    },
    /// Set plugin display order
    Reorder {
        /// Plugin names, first shown first
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Set a plugin user variable
    Var {
        /// Plugin name
        name: String,
        /// Variable key
        key: String,
        /// Variable value
        value: String,
    },
    /// Search across enabled plugins
    Search {
        /// Query text
        query: String,
        /// Page number
        #[arg(short, long, default_value = "1")]
        page: u32,
        /// Media type (music, album, artist, sheet)
        #[arg(short = 't', long, default_value = "music")]
        media_type: MediaType,
        /// Only search this plugin
        #[arg(long)]
        plugin: Option<String>,
    },
    /// Show charts from every plugin
    TopLists,
    /// Show recommendation tags from every plugin
    Recommend,
    /// Import a sheet from a link
    ImportSheet {
        /// Sheet link or identifier
        link: String,
    },
    /// Import a single track from a link
    ImportItem {
        /// Track link or identifier
        link: String,
    },
    /// List plugins able to import
    Importers {
        /// Import kind (sheet or item)
        #[arg(default_value = "sheet")]
        kind: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn,tuneport=info",
        1 => "info,tuneport=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the command's envelope reported success
async fn run(cli: Cli) -> anyhow::Result<bool> {
    // --data-dir wins over the environment and the config file
    let data_dir = cli.data_dir.map(|dir| dir.display().to_string());
    let config = Config::resolve(load_config_file()?, |key| match key {
        "TUNEPORT_DATA_DIR" => data_dir.clone(),
        _ => std::env::var(key).ok(),
    })?;
    tracing::debug!(
        data_dir = %config.data_dir.display(),
        host_version = %config.host_version,
        "configuration loaded"
    );
    let host = PluginHost::from_config(&config).await?;

    match cli.command {
        Command::List => emit(&host.plugins().await),
        Command::Install { source, force } => {
            let options = InstallOptions {
                skip_version_check: force,
            };
            let envelope = if source.starts_with("http://") || source.starts_with("https://") {
                host.install_from_url(&source, options).await
            } else {
                host.install_from_file(&PathBuf::from(source), options).await
            };
            emit(&envelope)
        }
        Command::Uninstall { hash } => emit(&host.uninstall(&hash).await),
        Command::UninstallAll => emit(&host.uninstall_all().await),
        Command::Update { hash } => emit(&host.update(&hash).await),
        Command::Enable { name } => emit(&host.set_enabled(&name, true).await),
        Command::Disable { name } => emit(&host.set_enabled(&name, false).await),
        Command::Reorder { names } => emit(&host.reorder(&names).await),
        Command::Var { name, key, value } => {
            emit(&host.set_user_variable(&name, &key, &value).await)
        }
        Command::Search {
            query,
            page,
            media_type,
            plugin,
        } => {
            let options = SearchOptions {
                query,
                page,
                media_type,
                plugin,
            };
            emit(&host.search(&options).await)
        }
        Command::TopLists => emit(&host.top_lists().await),
        Command::Recommend => emit(&host.recommend_tags().await),
        Command::ImportSheet { link } => emit(&host.import_sheet(&link).await),
        Command::ImportItem { link } => emit(&host.import_item(&link).await),
        Command::Importers { kind } => {
            let kind = match kind.as_str() {
                "sheet" => ImportKind::Sheet,
                "item" => ImportKind::Item,
                other => anyhow::bail!("unknown import kind: {other}"),
            };
            emit(&host.import_plugins(kind).await)
        }
    }
}

fn emit<T: Serialize>(envelope: &Envelope<T>) -> anyhow::Result<bool> {
    println!("{}", serde_json::to_string_pretty(envelope)?);
    Ok(envelope.success)
}

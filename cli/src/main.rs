//! protocache CLI: inspect and use protobuf descriptors served by a schema
//! registry.
//!
//! # Commands
//! ```text
//! protocache list     --url <url>...
//! protocache describe --url <url>... --name <full.Name>
//! protocache decode   --url <url>... --name <full.Name> --hex <payload> [--json]
//! protocache watch    --url <url>... --interval <secs>
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;

use protocache_observability::{init_tracing, LogConfig, ProtoCacheMetrics};
use protocache_remote::{
    parse_header, ClientConfig, DescriptorClient, HttpConfig, MergeMode, RefreshStrategy,
};

mod cmd_describe;

#[derive(Parser)]
#[command(
    name = "protocache",
    about = "Protobuf descriptor cache: list, describe and decode with remote schemas",
    version
)]
struct Cli {
    /// Extra request header, NAME=VALUE (repeatable)
    #[arg(long = "header", global = true, value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// HTTP timeout per download in milliseconds
    #[arg(long, global = true, default_value_t = 10_000)]
    timeout_ms: u64,

    /// Log level or EnvFilter directives, e.g. "protocache_remote=debug"
    /// [default: warn, info for watch]
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit JSON structured logs
    #[arg(long, global = true)]
    json_logs: bool,

    /// Key types by Java class name instead of proto full name
    #[arg(long, global = true)]
    java_names: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// Descriptor-set URL; applied in the order given (repeatable)
    #[arg(long = "url", required = true)]
    urls: Vec<String>,

    /// Poll `<url>/versions` and download only newer versions
    #[arg(long)]
    version_based: bool,

    /// Each source replaces the whole registry instead of merging into it
    #[arg(long)]
    replace: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List every type name known after one refresh
    List {
        #[command(flatten)]
        sources: SourceArgs,
    },

    /// Show the fields or enum values of one type
    Describe {
        #[command(flatten)]
        sources: SourceArgs,
        /// Fully-qualified type name, e.g. test.One
        #[arg(long)]
        name: String,
    },

    /// Decode a hex-encoded protobuf payload
    Decode {
        #[command(flatten)]
        sources: SourceArgs,
        /// Fully-qualified message name
        #[arg(long)]
        name: String,
        /// Payload bytes (hex, optionally 0x-prefixed)
        #[arg(long)]
        hex: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Keep refreshing on an interval and log every cycle until Ctrl-C
    Watch {
        #[command(flatten)]
        sources: SourceArgs,
        /// Seconds between refreshes
        #[arg(long, default_value_t = 60)]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = match cli.command {
        Commands::Watch { .. } => "info",
        _ => "warn",
    };
    init_tracing(&LogConfig {
        level: cli.log_level.clone().unwrap_or_else(|| default_level.to_string()),
        json: cli.json_logs,
        ..LogConfig::default()
    })
    .context("install log subscriber")?;

    match &cli.command {
        Commands::List { sources } => cmd_list(&cli, sources).await,
        Commands::Describe { sources, name } => cmd_describe(&cli, sources, name).await,
        Commands::Decode {
            sources,
            name,
            hex,
            json,
        } => cmd_decode(&cli, sources, name, hex, *json).await,
        Commands::Watch { sources, interval } => cmd_watch(&cli, sources, *interval).await,
    }
}

fn client_config(cli: &Cli, sources: &SourceArgs) -> ClientConfig {
    let mut config = ClientConfig::new(sources.urls.iter().cloned());
    config.java_class_names = cli.java_names;
    config.http = HttpConfig {
        timeout_ms: cli.timeout_ms,
        headers: cli.headers.clone(),
    };
    if sources.version_based {
        config.refresh_strategy = RefreshStrategy::VersionBased;
    }
    if sources.replace {
        config.merge_mode = MergeMode::Replace;
    }
    config
}

async fn connect(cli: &Cli, sources: &SourceArgs) -> Result<DescriptorClient> {
    DescriptorClient::new(client_config(cli, sources))
        .await
        .context("load descriptors")
}

// ─── Command implementations ─────────────────────────────────────────────────

async fn cmd_list(cli: &Cli, sources: &SourceArgs) -> Result<()> {
    let client = connect(cli, sources).await?;
    let names = client.store().names();
    println!("Loaded {} types from {} source(s)", names.len(), sources.urls.len());
    for name in &names {
        println!("  {name}");
    }
    Ok(())
}

async fn cmd_describe(cli: &Cli, sources: &SourceArgs, name: &str) -> Result<()> {
    let client = connect(cli, sources).await?;
    let def = client
        .get_descriptor(name)
        .with_context(|| format!("unknown type '{name}'"))?;
    cmd_describe::run(&def);
    Ok(())
}

async fn cmd_decode(
    cli: &Cli,
    sources: &SourceArgs,
    name: &str,
    payload_hex: &str,
    as_json: bool,
) -> Result<()> {
    let client = connect(cli, sources).await?;
    let bytes = hex::decode(payload_hex.strip_prefix("0x").unwrap_or(payload_hex))
        .context("invalid payload hex")?;
    let msg = client
        .parse_with_refresh(name, &bytes)
        .await
        .with_context(|| format!("decode payload as '{name}'"))?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&msg.to_json())?);
    } else {
        println!("{msg}");
        if msg.has_unknown_fields() {
            println!("Unknown fields:");
            for u in msg.unknown_fields() {
                println!("  #{} ({} bytes)", u.number, u.data.len());
            }
        }
    }
    Ok(())
}

async fn cmd_watch(cli: &Cli, sources: &SourceArgs, interval: u64) -> Result<()> {
    let mut config = client_config(cli, sources);
    config.auto_refresh = true;
    config.interval_secs = interval;

    let client = DescriptorClient::builder(config)
        .observer(Arc::new(ProtoCacheMetrics::global()))
        .build()
        .await
        .context("load descriptors")?;
    println!(
        "Watching {} source(s) every {interval}s, {} types loaded. Ctrl-C to stop.",
        sources.urls.len(),
        client.store().len()
    );

    tokio::signal::ctrl_c().await.context("wait for Ctrl-C")?;
    client.close();
    println!("Stopped with {} types loaded", client.store().len());
    Ok(())
}

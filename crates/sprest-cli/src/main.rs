//! sprest - issue SharePoint-style OData requests from the command line.
//!
//! Every result is printed to stdout as JSON; logs go to stderr.

mod commands;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sprest_core::{RuntimeConfig, SpRestClient};
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "sprest")]
#[command(about = "Issue OData REST requests, batches and digest lookups")]
struct Args {
    /// Web url requests are resolved against (overrides the config file)
    #[arg(short, long)]
    site: Option<String>,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Extra header sent with every request, as "Name: value"
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Serve GETs from the local response cache when possible
    #[arg(long)]
    cache: bool,

    /// Location of the local cache database
    #[arg(long)]
    cache_db: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// GET one resource and print it
    Get {
        /// Path below the site, e.g. "_api/web/lists"
        path: String,
    },
    /// GET several resources in a single $batch request
    Batch {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Print the form digest for the site
    Digest,
}

/// Split a `Name: value` header argument.
fn parse_header(raw: &str) -> Result<(String, String)> {
    let Some((name, value)) = raw.split_once(':') else {
        bail!("Invalid header '{}', expected \"Name: value\"", raw);
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("Invalid header '{}', name is empty", raw);
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn load_config(args: &Args) -> Result<RuntimeConfig> {
    let mut config = match &args.config {
        Some(path) => RuntimeConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => RuntimeConfig::new(),
    };

    if let Some(site) = &args.site {
        url::Url::parse(site).with_context(|| format!("Invalid site url '{}'", site))?;
        config.base_url = Some(site.trim_end_matches('/').to_string());
    }
    for raw in &args.headers {
        let (name, value) = parse_header(raw)?;
        config.headers.set(name, value);
    }
    Ok(config)
}

fn default_cache_db() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("sprest")
        .join("cache.db")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = load_config(&args)?;
    let Some(site) = config.base_url.clone() else {
        bail!("No site given; pass --site or set base_url in the config file");
    };

    let mut builder = SpRestClient::builder(config);
    if args.cache {
        let db = args.cache_db.clone().unwrap_or_else(default_cache_db);
        debug!("Using cache database {}", db.display());
        builder = builder.sqlite_path(db);
    }
    let client = builder.build()?;

    match args.command {
        Command::Get { path } => commands::get(&client, &path, args.cache).await,
        Command::Batch { paths } => commands::batch(&client, &site, &paths, args.cache).await,
        Command::Digest => commands::digest(&client, &site).await,
    }
}

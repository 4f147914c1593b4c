// finops-api command line.
// Issues one request through the dispatcher and cache, printing the resulting payload.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use finops_api::{
    ApiConfig, CacheStore, Dispatcher, HttpTransport, Method, RequestDescriptor, SuccessTransform,
};

#[derive(Parser, Debug)]
#[command(name = "finops-api")]
#[command(about = "Issue cached requests against the cost-management API")]
struct Args {
    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: Method,

    /// Endpoint path relative to the base URL
    url: String,

    /// Cache label for the request (defaults to the path)
    #[arg(short, long)]
    label: Option<String>,

    /// Request parameter as key=value; JSON values are parsed
    #[arg(short, long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// Scope that gives the request its own cache entry
    #[arg(long)]
    scope: Option<String>,

    /// Cache TTL in seconds
    #[arg(long)]
    ttl: Option<u64>,

    /// Labels to invalidate when the request succeeds
    #[arg(long = "invalidates", value_name = "LABEL")]
    invalidates: Vec<String>,

    /// JSON pointer to extract from the response
    #[arg(long)]
    pointer: Option<String>,

    /// Issue the request this many times (repeats are served from cache)
    #[arg(long, default_value = "1")]
    repeat: u32,

    /// Path to a JSON config file
    #[arg(long, env = "FINOPS_API_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .compact()
        .init();

    let config = match &args.config {
        Some(path) => ApiConfig::load_from(Some(path.as_path())),
        None => ApiConfig::load(),
    }
    .context("failed to load configuration")?;
    info!(base_url = %config.base_url, "loaded configuration");

    let transport = Arc::new(HttpTransport::from_config(&config)?);
    let dispatcher = Dispatcher::new(Arc::new(CacheStore::new()), transport)
        .with_retry(config.retry.to_policy());

    let descriptor = build_descriptor(&args, config.default_ttl())?;
    let mut payload = None;
    for _ in 0..args.repeat.max(1) {
        payload = Some(dispatcher.request(descriptor.clone()).await?);
    }

    for key in dispatcher.store().keys() {
        if let Some(snapshot) = dispatcher.store().snapshot(&key) {
            debug!(key = %key, status = ?snapshot.status, fetched_at = ?snapshot.fetched_at, "cache entry");
        }
    }

    if let Some(payload) = payload {
        println!("{}", serde_json::to_string_pretty(payload.as_ref())?);
    }
    Ok(())
}

fn build_descriptor(args: &Args, default_ttl: Option<Duration>) -> Result<RequestDescriptor> {
    let label = args.label.clone().unwrap_or_else(|| args.url.clone());
    let mut descriptor = RequestDescriptor::new(label, args.method, args.url.clone())
        .invalidating(args.invalidates.iter().cloned());

    for param in &args.params {
        let (key, raw) = param
            .split_once('=')
            .with_context(|| format!("parameter {} is not KEY=VALUE", param))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        descriptor = descriptor.with_param(key, value);
    }
    if let Some(scope) = &args.scope {
        descriptor = descriptor.with_scope(scope.clone());
    }
    if let Some(ttl) = args.ttl.map(Duration::from_secs).or(default_ttl) {
        descriptor = descriptor.with_ttl(ttl);
    }
    if let Some(pointer) = &args.pointer {
        descriptor = descriptor.on_success(SuccessTransform::Pointer(pointer.clone()));
    }
    Ok(descriptor)
}

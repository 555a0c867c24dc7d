//! Resource Class Operator
//!
//! Resolves volume sizes, access modes, container memory and CPU for
//! application instances from cluster and project resource classes.

use clap::Parser;
use kube::{Api, Client};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use resource_class_operator::controller::{
    reconciler, run_class_watchers, KubePvcMaterializer, KubeStatusWriter,
};
use resource_class_operator::{
    crd, ApiServer, AppInstance, ClassRegistry, Context, DefaultingCoordinator, Error, Metrics,
    OperatorConfig, ResolverConfig, Result,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Resource Class Operator - resolves application resources against resource classes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// API (health, metrics, webhook, diagnostics) bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8090")]
    api_addr: String,

    /// Only watch application instances and project classes in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Requeue interval for converged instances, in seconds
    #[arg(long, env = "RESYNC_INTERVAL", default_value = "300")]
    resync_interval_secs: u64,

    /// Memory for containers without a class or with an unbounded class
    #[arg(long, env = "WORKLOAD_MEMORY_DEFAULT")]
    workload_memory_default: Option<String>,

    /// Memory ceiling for containers without a class
    #[arg(long, env = "WORKLOAD_MEMORY_MAXIMUM")]
    workload_memory_maximum: Option<String>,

    /// Size for volumes without a class or with an unbounded class
    #[arg(long, env = "DEFAULT_VOLUME_SIZE", default_value = "10G")]
    default_volume_size: String,

    /// Resolve against platform defaults when no class applies
    #[arg(long, env = "ALLOW_UNCLASSED")]
    allow_unclassed: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Print the custom resource definitions as YAML and exit
    #[arg(long)]
    crd: bool,
}

impl Args {
    fn operator_config(&self) -> Result<OperatorConfig> {
        let api_addr: SocketAddr = self
            .api_addr
            .parse()
            .map_err(|e| Error::Configuration(format!("Invalid API address: {}", e)))?;

        Ok(OperatorConfig {
            api_addr,
            watch_namespace: self.watch_namespace.clone(),
            resync_interval: Duration::from_secs(self.resync_interval_secs),
            resolver: ResolverConfig::from_literals(
                self.workload_memory_default.as_deref(),
                self.workload_memory_maximum.as_deref(),
                &self.default_volume_size,
                self.allow_unclassed,
            )?,
        })
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.crd {
        print!("{}", crd::crds_yaml()?);
        return Ok(());
    }

    init_logging(&args)?;
    let config = args.operator_config()?;

    info!("Starting Resource Class Operator");
    info!("  Version: {}", resource_class_operator::VERSION);
    info!("  API: {}", config.api_addr);
    info!("  Namespace: {}", config.watch_namespace.as_deref().unwrap_or("<all>"));
    info!("  Default volume size: {}", config.resolver.default_volume_size);
    info!("  Allow unclassed: {}", config.resolver.allow_unclassed);

    let client = Client::try_default().await?;
    let registry = ClassRegistry::new();
    let metrics = Arc::new(Metrics::new()?);

    // Class watchers
    let watchers = tokio::spawn(run_class_watchers(
        client.clone(),
        registry.clone(),
        config.watch_namespace.clone(),
    ));

    // API server
    let api_server = Arc::new(ApiServer::new(
        config.api_addr,
        registry.clone(),
        metrics.clone(),
        config.resolver.clone(),
    ));
    let api_handle = {
        let server = api_server.clone();
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("API server error: {}", e);
            }
        })
    };

    // AppInstance controller
    let ctx = Context::new(
        DefaultingCoordinator::new(registry.clone(), config.resolver.clone(), metrics),
        Arc::new(KubeStatusWriter::new(client.clone())),
        Arc::new(KubePvcMaterializer::new(client.clone())),
        config.resync_interval,
    );
    let apps: Api<AppInstance> = match &config.watch_namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    reconciler::run(apps, registry, ctx).await;

    // Controller stops on SIGTERM/SIGINT
    api_server.shutdown();
    watchers.abort();
    let _ = api_handle.await;

    info!("Operator shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let directive = |d: &str| {
        d.parse::<Directive>()
            .map_err(|e| Error::Configuration(format!("log directive {d}: {e}")))
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive(directive("hyper=warn")?)
        .add_directive(directive("kube=info")?)
        .add_directive(directive("tower=warn")?)
        .add_directive(directive("axum=info")?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

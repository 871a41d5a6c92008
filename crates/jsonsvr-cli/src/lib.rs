//! `jsonsvr` command line server.
//!
//! Loads `config.json`, the service descriptor it names and any script
//! imports, then serves the routes with axum until `/_stop` or Ctrl-C.

pub mod config;
mod watch;

use anyhow::{Context as _, Result};
use axum::Router;
use clap::Parser;
use futures::FutureExt;
use jsonsvr_core::{
    Interpreter, LocalFileReader, ObjectStorageReader, Readers, RouteTable, ServiceError,
};
use jsonsvr_web::AxumServiceAdapter;
use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Notify;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub use config::ServerConfig;

const INDEX_PAGES: [&str; 2] = ["./index.html", "./dist/index.html"];

#[derive(Debug, Clone, Parser)]
#[command(name = "jsonsvr", version, about = "Serve a declarative JSON service definition")]
pub struct Cli {
    /// Configuration file.
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Port to listen on (overrides `port`).
    #[arg(long)]
    pub port: Option<u16>,

    /// Service descriptor path or `s3://bucket/key` (overrides `serviceDescriptor`).
    #[arg(long)]
    pub service: Option<String>,

    /// Reload the service descriptor when it changes on disk.
    #[arg(long)]
    pub watch: bool,

    /// Log every request and response under the `access` target.
    #[arg(long)]
    pub access_log: bool,
}

impl Cli {
    /// Configuration file contents with command line overrides applied.
    pub fn resolve_config(&self) -> (ServerConfig, Option<String>) {
        let (mut config, notice) = ServerConfig::load_or_default(&self.config);
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(service) = &self.service {
            config.service_descriptor = service.clone();
        }
        if self.access_log {
            config.access_log = true;
        }
        (config, notice)
    }
}

pub async fn run_from_env() -> Result<()> {
    run(Cli::parse()).await
}

pub async fn run_from_args<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    run(Cli::try_parse_from(args)?).await
}

pub async fn run(cli: Cli) -> Result<()> {
    let (config, notice) = cli.resolve_config();
    init_tracing(&config.log_level);
    if let Some(notice) = notice {
        warn!("{notice}");
    }

    let interpreter = Arc::new(build_interpreter(&config));
    let descriptor = config.service_descriptor.clone();
    let table = load_service(&interpreter, &descriptor)
        .await
        .with_context(|| format!("failed to load service descriptor {descriptor}"))?;
    info!(descriptor = %descriptor, routes = table.len(), "service loaded");

    let index_page = if config.no_default_index {
        None
    } else {
        load_index_page()
    };

    let reload_interpreter = Arc::clone(&interpreter);
    let reload_descriptor = descriptor.clone();
    let adapter = AxumServiceAdapter::new(interpreter, table)
        .with_access_log(config.access_log)
        .with_index_page(index_page)
        .with_reloader(move || {
            let interpreter = Arc::clone(&reload_interpreter);
            let descriptor = reload_descriptor.clone();
            async move { load_service(&interpreter, &descriptor).await }.boxed()
        });

    if cli.watch {
        watch::spawn(adapter.clone(), &descriptor);
    }

    let shutdown = adapter.shutdown_signal();
    let app: Router = adapter.router().layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(wait_for_stop(shutdown))
    .await
    .context("server failed")?;

    info!(time = %chrono::Utc::now().to_rfc3339(), "server stopped");
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init();
}

fn build_interpreter(config: &ServerConfig) -> Interpreter {
    let readers = Readers::new(
        Arc::new(LocalFileReader),
        Arc::new(ObjectStorageReader::new(
            config.object_storage.endpoint.clone(),
            config.object_storage.timeout(),
        )),
    );
    let mut interpreter = Interpreter::with_readers(readers);
    for (name, path) in &config.imports {
        if let Err(e) = interpreter.evaluator_mut().import_module(name, path) {
            error!(module = %name, error = %e, "unable to load module");
        }
    }
    interpreter
}

/// Read and parse the service descriptor through the interpreter's readers,
/// so object storage descriptors work too.
pub async fn load_service(
    interpreter: &Interpreter,
    descriptor: &str,
) -> Result<RouteTable, ServiceError> {
    let text = interpreter.read_file(descriptor).await?;
    RouteTable::from_json_str(&text)
}

fn load_index_page() -> Option<String> {
    INDEX_PAGES.iter().map(Path::new).find_map(|path| {
        let html = std::fs::read_to_string(path).ok()?;
        info!(page = %path.display(), "default index page mounted");
        Some(html)
    })
}

async fn wait_for_stop(stop: Arc<Notify>) {
    tokio::select! {
        _ = stop.notified() => info!("stop endpoint called"),
        _ = tokio::signal::ctrl_c() => info!("interrupt received"),
    }
}

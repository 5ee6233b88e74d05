//! Vidpipe server
//!
//! Wires up:
//! - the backing store (Redis, or in-memory for local runs)
//! - resolvers, fetcher and transcoder
//! - the worker loops draining the download queue
//! - the JSON API

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vidpipe::adapters::local::{http, DirectResolver, Fetcher, LocalStorage, RedisPool};
use vidpipe::adapters::memory::MemoryStore;
use vidpipe::av::Transcoder;
use vidpipe::domain::platform::Platform;
use vidpipe::ports::resolver::ResolverRegistry;
use vidpipe::ports::storage::StoragePathProvider;
use vidpipe::ports::Store;
use vidpipe::{Config, StoreKind, TaskService, WorkerService};

#[tokio::main]
async fn main() {
    // RUST_LOG may come from .env, and config parsing already logs.
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vidpipe=info")),
        )
        .init();

    let config = Config::from_env();

    match config.store {
        StoreKind::Redis => {
            let pool = match RedisPool::new(&config.redis_url) {
                Ok(pool) => pool
                    .with_cookie_ttl(config.cookie_ttl)
                    .with_default_root(&config.storage_root),
                Err(e) => {
                    error!(error = %e, "failed to create redis pool");
                    std::process::exit(1);
                }
            };
            serve(config, pool.clone(), pool).await;
        }
        StoreKind::Memory => {
            warn!("using the in-memory store, tasks are lost on exit");
            let store = MemoryStore::with_cookie_ttl(config.cookie_ttl);
            let storage = LocalStorage::new(&config.storage_root);
            serve(config, store, storage).await;
        }
    }
}

async fn serve<S, P>(config: Config, store: S, storage: P)
where
    S: Store,
    P: StoragePathProvider + Clone + 'static,
{
    // 1. Pipeline components
    let mut resolvers = ResolverRegistry::new();
    if config.allow_direct_urls {
        resolvers = resolvers.register(Platform::Unknown, Arc::new(DirectResolver));
    }
    let fetcher = match Fetcher::new(config.fetch()) {
        Ok(fetcher) => fetcher,
        Err(e) => {
            error!(error = %e, "failed to build http client");
            std::process::exit(1);
        }
    };
    let transcoder = Transcoder::new(config.transcoder());
    if let Err(e) = transcoder.check_tool().await {
        warn!(error = %e, "ffmpeg is not usable, transcoding will fail");
    }

    // 2. Application services
    let tasks = Arc::new(TaskService::new(store.clone()));
    let worker = Arc::new(WorkerService::new(
        store,
        storage,
        resolvers,
        fetcher,
        transcoder,
        config.worker(),
    ));

    // 3. Workers
    let shutdown = CancellationToken::new();
    let mut handles = Vec::with_capacity(config.workers);
    for i in 0..config.workers {
        let worker = worker.clone();
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            worker.run_worker_loop(i, shutdown).await;
        }));
    }
    info!(workers = config.workers, "started pipeline workers");

    // 4. HTTP
    let listener = match tokio::net::TcpListener::bind(config.bind_addr()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %config.bind_addr(), error = %e, "failed to bind TCP listener");
            std::process::exit(1);
        }
    };
    info!(addr = %config.bind_addr(), "listening");

    let signal = shutdown.clone();
    let served = axum::serve(listener, http::router(tasks))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutting down");
            signal.cancel();
        })
        .await;
    if let Err(e) = served {
        error!(error = %e, "server error");
    }

    shutdown.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "worker task panicked");
        }
    }
}

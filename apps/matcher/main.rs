#![warn(unused_extern_crates)]
use anyhow::{Context, Result, bail};
use dotenv::dotenv;
use futures::future::join_all;
use matcher::{
    api::{self, AppState},
    config,
    document_store::{DocumentStore, PgDocumentStore},
    embeddings::{self, Embedder},
    live::{LiveSink, RendererRegistry, spawn_pollers},
    ranking::RankingEngine,
    snapshot::{IndexSnapshot, SnapshotBuilder, SnapshotHandle},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use utils::tracing::setup_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    setup_tracing();

    info!("Matcher service starting up");
    let config = config::load()?;

    let store: Arc<dyn DocumentStore> = Arc::new(
        PgDocumentStore::connect(config.database_url()?, config.database.max_connections).await?,
    );
    let embedder: Arc<dyn Embedder> = embeddings::from_config(&config.embedding)?;
    info!(
        model = embedder.model_version(),
        dimension = embedder.dimension(),
        "Embedder ready"
    );

    let handle = SnapshotHandle::new(IndexSnapshot::empty(embedder.dimension()));
    let builder = Arc::new(SnapshotBuilder::new(
        Arc::clone(&store),
        Arc::clone(&embedder),
        handle.clone(),
        config.ranking.doctors_collection.clone(),
    ));

    match builder.rebuild().await {
        Ok(count) => info!(count, "Initial index built"),
        Err(e) if e.is_fatal() => bail!("initial index build failed: {e}"),
        Err(e) => warn!(error = %e, "Initial index build failed, serving an empty index"),
    }

    let ranking = Arc::new(RankingEngine::new(
        Arc::clone(&store),
        Arc::clone(&embedder),
        handle,
        config.ranking.doctors_collection.clone(),
        config.ranking.default_top_k,
        config.ranking.max_top_k,
    ));

    let shutdown = CancellationToken::new();

    let mut poller_handles = Vec::new();
    let mut sink_handle = None;
    if config.poller.enabled {
        let (sender, receiver) = mpsc::channel(config.poller.channel_capacity);
        let sink = LiveSink::open(&config.poller.output_path).await?;
        sink_handle = Some(tokio::spawn(sink.run(receiver)));

        poller_handles = spawn_pollers(
            &config.poller.collections,
            Arc::clone(&store),
            Arc::clone(&embedder),
            Arc::new(RendererRegistry::default()),
            sender,
            config.poller.interval(),
            shutdown.clone(),
        )
        .await;
        info!(pollers = poller_handles.len(), "Live pollers started");
    }

    let app = api::router(AppState {
        ranking,
        builder,
        shutdown: shutdown.clone(),
    });
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    let addr = listener.local_addr()?;

    let server_shutdown = shutdown.clone();
    let server_handle = tokio::spawn(async move {
        info!(address = %addr, "Starting HTTP server");
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
        {
            error!(error = %e, "HTTP server error");
        }
    });

    let fatal = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully");
            false
        }
        _ = shutdown.cancelled() => {
            error!("Fatal fault reported, shutting down");
            true
        }
    };
    shutdown.cancel();

    if let Err(e) = server_handle.await {
        error!(error = %e, "HTTP server task failed");
    }
    for result in join_all(poller_handles).await {
        if let Err(e) = result {
            error!(error = %e, "Poller task failed");
        }
    }
    if let Some(handle) = sink_handle {
        match handle.await {
            Ok(Ok(view)) => info!(rows = view.len(), "Live sink drained"),
            Ok(Err(e)) => error!(error = ?e, "Live sink failed"),
            Err(e) => error!(error = %e, "Live sink task failed"),
        }
    }

    if fatal {
        bail!("matcher stopped after a fatal index fault");
    }
    info!("Matcher service shut down");
    Ok(())
}

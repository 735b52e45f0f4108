use crate::{
    config::Config,
    decoder::ImageDecoder,
    hub::ConnectionHub,
    labels::LabelSet,
    model::OrtClassifier,
    queue::frame_queue,
    server::{HttpServer, SharedState},
    session::SessionRegistry,
    telemetry::Metrics,
    worker::FrameWorker,
};

use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let classifier = match OrtClassifier::new(&config.model) {
        Ok(classifier) => Arc::new(classifier),
        Err(e) => {
            tracing::error!("Failed to initialize classifier: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let labels = match config.model.get_labels_path() {
        Some(path) => match LabelSet::from_file(&path) {
            Ok(labels) => {
                tracing::info!("Loaded {} class labels from {:?}", labels.len(), path);
                labels
            }
            Err(e) => {
                tracing::error!("Failed to load labels from {:?}: {:?}", path, e);
                return Err(Box::new(e));
            }
        },
        None => LabelSet::default(),
    };

    let metrics = Arc::new(Metrics::new()?);
    let registry = Arc::new(SessionRegistry::new());
    let (queue, receiver) = frame_queue();
    let hub = Arc::new(ConnectionHub::new(
        registry.clone(),
        queue,
        metrics.clone(),
    ));

    let (shutdown_tx, _) = broadcast::channel(1);
    let worker_shutdown_rx = shutdown_tx.subscribe();
    let server_shutdown_rx = shutdown_tx.subscribe();

    let worker = FrameWorker::new(
        receiver,
        registry,
        Arc::new(ImageDecoder::new(config.model.input_size)),
        classifier,
        Arc::new(labels),
        hub.clone(),
        metrics.clone(),
    );
    let worker_handle = worker.spawn(worker_shutdown_rx);

    let server = HttpServer::new(SharedState { hub, metrics }, &config.server).await?;
    let server_handle = server.run(server_shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    let _ = worker_handle.await;
    let _ = server_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

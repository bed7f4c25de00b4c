//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::PromoterError;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::{deployer, expiry};

/// Run the promotion engine until `shutdown_signal` resolves
pub async fn run(
    version: String,
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), PromoterError> {
    info!("Initializing promotion engine {}...", version);

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start promotion engine: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, PromoterError> {
    let (app_state, queue_rx) = AppState::init(options).await?;
    let app_state = Arc::new(app_state);
    shutdown_manager.with_app_state(app_state.clone())?;

    init_deployer_worker(
        options.deployer.clone(),
        app_state.clone(),
        queue_rx,
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    init_expiry_worker(
        options.expiry.clone(),
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    if options.enable_status_server {
        init_status_server(
            options,
            app_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )
        .await?;
    }

    Ok(app_state)
}

fn init_deployer_worker(
    options: deployer::Options,
    app_state: Arc<AppState>,
    queue_rx: mpsc::Receiver<String>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), PromoterError> {
    info!("Initializing deployer worker...");

    let pipeline = app_state.pipeline.clone();
    let handle = tokio::spawn(async move {
        deployer::run(
            &options,
            pipeline,
            queue_rx,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_deployer_worker_handle(handle)
}

fn init_expiry_worker(
    options: expiry::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), PromoterError> {
    info!("Initializing expiry worker...");

    let approvals = app_state.approvals.clone();
    let handle = tokio::spawn(async move {
        expiry::run(
            &options,
            approvals.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_expiry_worker_handle(handle)
}

async fn init_status_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), PromoterError> {
    info!("Initializing status server...");

    let server_state = ServerState::new(
        app_state.store.clone(),
        app_state.approvals.clone(),
        app_state.audit.clone(),
    );

    let handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_status_server_handle(handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    status_server_handle: Option<JoinHandle<Result<(), PromoterError>>>,
    deployer_worker_handle: Option<JoinHandle<()>>,
    expiry_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            status_server_handle: None,
            deployer_worker_handle: None,
            expiry_worker_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), PromoterError> {
        if self.app_state.is_some() {
            return Err(PromoterError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_deployer_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), PromoterError> {
        if self.deployer_worker_handle.is_some() {
            return Err(PromoterError::ShutdownError("deployer_handle already set".to_string()));
        }
        self.deployer_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_expiry_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), PromoterError> {
        if self.expiry_worker_handle.is_some() {
            return Err(PromoterError::ShutdownError("expiry_handle already set".to_string()));
        }
        self.expiry_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_status_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), PromoterError>>,
    ) -> Result<(), PromoterError> {
        if self.status_server_handle.is_some() {
            return Err(PromoterError::ShutdownError("server_handle already set".to_string()));
        }
        self.status_server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), PromoterError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), PromoterError> {
        info!("Shutting down promotion engine...");

        // 1. Status server, so pollers stop seeing a live engine
        if let Some(handle) = self.status_server_handle.take() {
            handle.await.map_err(|e| PromoterError::ShutdownError(e.to_string()))??;
        }

        // 2. Expiry worker
        if let Some(handle) = self.expiry_worker_handle.take() {
            handle.await.map_err(|e| PromoterError::ShutdownError(e.to_string()))?;
        }

        // 3. Deployer worker, which drains in-flight pipelines
        if let Some(handle) = self.deployer_worker_handle.take() {
            handle.await.map_err(|e| PromoterError::ShutdownError(e.to_string()))?;
        }

        // 4. App state
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}

use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, sync::watch};
use tracing::{info, warn};

use crate::api::{self, AppState};
use crate::audit::AuditLog;
use crate::catalog::VersionCatalog;
use crate::config::ServerConfig;

pub struct VersionServer {
    config: ServerConfig,
    catalog: Arc<VersionCatalog>,
    shutdown_tx: watch::Sender<bool>,
}

impl VersionServer {
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let catalog = match &config.catalog_path {
            Some(path) => VersionCatalog::load(path)?,
            None => VersionCatalog::builtin(),
        };
        if catalog.is_empty() {
            warn!("Release catalog is empty; every client will be told it is up to date");
        }

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            catalog: Arc::new(catalog),
            shutdown_tx,
        })
    }

    pub fn catalog(&self) -> &VersionCatalog {
        &self.catalog
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn start(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let (audit, writer) = AuditLog::spawn(
            self.config.audit_log_path.clone(),
            self.config.audit_queue_capacity,
        )
        .await;

        let app = api::router(AppState {
            catalog: Arc::clone(&self.catalog),
            audit,
        });

        info!(
            "zelly-versiond listening on {} ({} releases, latest {})",
            listener.local_addr()?,
            self.catalog.len(),
            self.catalog.latest_version()
        );

        let shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(Self::shutdown_signal(shutdown_rx))
            .await?;

        // Every sender went away with the router; let the writer drain.
        if tokio::time::timeout(self.config.shutdown_timeout(), writer)
            .await
            .is_err()
        {
            warn!("Audit writer did not finish within the shutdown timeout");
        }

        info!("zelly-versiond stopped");
        Ok(())
    }

    async fn shutdown_signal(mut shutdown: watch::Receiver<bool>) {
        #[cfg(unix)]
        let mut sigterm = {
            use tokio::signal::unix::{signal, SignalKind};
            signal(SignalKind::terminate()).ok()
        };

        tokio::select! {
            _ = async {
                #[cfg(unix)]
                {
                    if let Some(ref mut sigterm) = sigterm {
                        sigterm.recv().await;
                    } else {
                        std::future::pending::<()>().await;
                    }
                }
                #[cfg(not(unix))]
                {
                    std::future::pending::<()>().await;
                }
            } => {
                info!("Received SIGTERM, starting graceful shutdown");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, starting graceful shutdown");
            }
            _ = async {
                while !*shutdown.borrow_and_update() {
                    if shutdown.changed().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
            } => {
                info!("Shutdown requested");
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

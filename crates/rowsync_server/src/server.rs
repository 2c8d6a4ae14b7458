//! Main sync server.

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::handler::{HandlerContext, RequestHandler};
use crate::http;
use axum::Router;
use rowsync_engine::{ChannelQueue, PermissionResolver, SyncEngine, TableChanged};
use rowsync_storage::{FileBackend, InMemoryBackend, InMemoryLockTable, StorageBackend};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;

/// The sync server.
///
/// Owns the engine, the permission resolver and the HTTP router.
///
/// # Example
///
/// ```
/// use rowsync_engine::AclTable;
/// use rowsync_server::{ServerConfig, SyncServer};
/// use std::sync::Arc;
///
/// let server = SyncServer::open(ServerConfig::default(), Arc::new(AclTable::new())).unwrap();
/// let _router = server.router();
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    changes: Option<UnboundedReceiver<TableChanged>>,
}

impl SyncServer {
    /// Opens the configured store and builds the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be opened.
    pub fn open(config: ServerConfig, resolver: Arc<dyn PermissionResolver>) -> ServerResult<Self> {
        let backend: Arc<dyn StorageBackend> = match &config.data_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "opening journal");
                Arc::new(FileBackend::open_with_create_dirs(path)?)
            }
            None => {
                tracing::warn!("no data path configured, state is kept in memory only");
                Arc::new(InMemoryBackend::new())
            }
        };
        let (queue, changes) = ChannelQueue::new();
        let engine = SyncEngine::new(backend, Arc::new(InMemoryLockTable::new()))
            .with_config(config.engine.clone())
            .with_queue(Arc::new(queue));

        let mut server = Self::with_engine(config, engine, resolver);
        server.changes = Some(changes);
        Ok(server)
    }

    /// Builds a server around an existing engine.
    pub fn with_engine(
        config: ServerConfig,
        engine: SyncEngine,
        resolver: Arc<dyn PermissionResolver>,
    ) -> Self {
        let context = Arc::new(HandlerContext::new(config, engine, resolver));
        Self {
            handler: RequestHandler::new(context),
            changes: None,
        }
    }

    /// The transport-independent handler.
    pub fn handler(&self) -> &RequestHandler {
        &self.handler
    }

    /// The HTTP router.
    pub fn router(&self) -> Router {
        http::router(self.handler.clone())
    }

    /// Serves HTTP on `listener` until ctrl-c.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails.
    pub async fn serve(mut self, listener: TcpListener) -> ServerResult<()> {
        if let Some(mut changes) = self.changes.take() {
            tokio::spawn(async move {
                while let Some(change) = changes.recv().await {
                    tracing::debug!(table = %change.table_id, data_etag = %change.data_etag, "table changed");
                }
            });
        }

        let addr = listener.local_addr()?;
        tracing::info!(%addr, "rowsync server listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        tracing::info!("rowsync server stopped");
        Ok(())
    }

    /// Binds the configured address and serves until ctrl-c.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn run(self) -> ServerResult<()> {
        let listener = TcpListener::bind(self.handler.context().config.bind_addr).await?;
        self.serve(listener).await
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

//! TCP listener for the query protocol.

use crate::conn;
use reql_session::JobsRegistry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Document query protocol server.
///
/// # Example
///
/// ```no_run
/// use reql_server::Server;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let server = Server::new("127.0.0.1", 28015);
///     server.start().await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    host: String,
    port: u16,
    registry: Arc<JobsRegistry>,
    return_empty_normal_batches: bool,
}

impl Server {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            registry: JobsRegistry::new(),
            return_empty_normal_batches: false,
        }
    }

    /// Allow change feeds to answer normal batches with no rows instead
    /// of holding the batch open.
    pub fn with_return_empty_normal_batches(mut self, enabled: bool) -> Self {
        self.return_empty_normal_batches = enabled;
        self
    }

    /// Handle to the admin jobs surface.
    pub fn jobs(&self) -> Arc<JobsRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accept connections forever.
    pub async fn start(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("query server listening on {}", addr);

        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    info!("new connection from {}", peer);
                    let registry = Arc::clone(&self.registry);
                    let return_empty_normal_batches = self.return_empty_normal_batches;
                    tokio::spawn(async move {
                        conn::handle_connection(
                            socket,
                            peer,
                            registry,
                            return_empty_normal_batches,
                        )
                        .await;
                    });
                }
                Err(err) => {
                    error!("accept error: {}", err);
                }
            }
        }
    }
}

use std::{io, net::SocketAddr};

use hyper_util::{
    rt::{TokioExecutor, TokioIo as HyperSocket},
    server::conn::auto::Builder,
};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::service::ProxyService;

/// HTTP server that accepts connections and hands them to the proxy service.
///
/// Every connection is served on its own task, HTTP/1.1 or HTTP/2 depending
/// on what the client speaks.
pub struct Server {
    /// The TCP listener for accepting incoming connections
    connection: TcpListener,
    /// The service every connection is served with
    service: ProxyService,
}

impl Server {
    /// Creates a new server instance bound to the specified address.
    ///
    /// # Arguments
    ///
    /// * `addr` - The network address to bind to
    /// * `service` - The proxy service handling requests
    pub async fn new(addr: SocketAddr, service: ProxyService) -> io::Result<Self> {
        Ok(Self {
            connection: TcpListener::bind(&addr).await?,
            service,
        })
    }

    /// The address actually bound, useful when binding to port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.connection.local_addr()
    }

    fn serve(&self, conn: TcpStream, peer: SocketAddr) {
        let io = HyperSocket::new(conn);
        let service = self.service.clone();

        tokio::spawn(async move {
            if let Err(e) = Builder::new(TokioExecutor::new())
                .serve_connection(io, service)
                .await
            {
                warn!("Error serving connection from {}: {:?}", peer, e);
            }
        });
    }

    /// Accepts a new connection and spawns a task to handle it.
    ///
    /// # Returns
    ///
    /// Returns `Ok(())` when a connection is accepted, or the accept error.
    pub async fn accept(&self) -> io::Result<()> {
        let (conn, peer) = self.connection.accept().await?;
        debug!("Accepted connection from {}", peer);
        self.serve(conn, peer);
        Ok(())
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// Connections already accepted keep running on their own tasks.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = self.accept() => {
                    if let Err(e) = accepted {
                        warn!("Failed to accept connection: {}", e);
                    }
                }
            }
        }
    }
}

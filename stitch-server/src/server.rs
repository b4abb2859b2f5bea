//! HTTP/1.1 server implementation

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use stitch_engine::UploadStore;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::error::ServerError;
use crate::handlers::handle_request;

pub struct StitchServer {
    store: Arc<UploadStore>,
}

impl StitchServer {
    pub fn new(store: Arc<UploadStore>) -> Self {
        Self { store }
    }

    /// Accept connections until `shutdown` resolves, then let in-flight
    /// requests complete before returning.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), ServerError> {
        if let Ok(addr) = listener.local_addr() {
            info!("stitch server listening on {}", addr);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote_addr) = accepted?;
                    debug!("New connection from {}", remote_addr);

                    let store = self.store.clone();
                    let stop = stop_rx.clone();
                    connections.spawn(Self::handle_connection(stream, remote_addr, store, stop));
                }
                _ = &mut shutdown => {
                    info!("Shutdown requested, draining {} connection(s)", connections.len());
                    break;
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        // Receivers only observe the change, a send error means nobody is left
        let _ = stop_tx.send(true);
        while connections.join_next().await.is_some() {}

        info!("Server stopped");
        Ok(())
    }

    async fn handle_connection(
        stream: TcpStream,
        remote_addr: SocketAddr,
        store: Arc<UploadStore>,
        mut stop: watch::Receiver<bool>,
    ) {
        let io = TokioIo::new(stream);

        let service = service_fn(move |req| {
            let store = store.clone();
            async move { handle_request(req, store).await }
        });

        let conn = http1::Builder::new().serve_connection(io, service);
        tokio::pin!(conn);

        let result = tokio::select! {
            result = conn.as_mut() => result,
            _ = stop.changed() => {
                conn.as_mut().graceful_shutdown();
                conn.await
            }
        };

        if let Err(err) = result {
            error!("Connection error from {}: {}", remote_addr, err);
        }
    }
}

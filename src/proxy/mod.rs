//! The interception listener.
//!
//! One TCP listener plays forward proxy and result server at once: CONNECT
//! clients get a raw byte tunnel, everything else is served locally by the
//! interception router. Connections are sniffed off the socket before hyper
//! sees them so the tunnel relay controls the exact handshake bytes.

use bytes::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub mod collector;
pub mod page;
pub mod router;
pub mod session;
pub mod tunnel;

pub use session::SessionState;

use crate::error::{HarvesterError, Result};

const CONNECT_PREFIX: &[u8] = b"CONNECT ";

/// Handle to the running listener. Owns the accept loop's task and the port
/// for the session's lifetime; shutting down releases both exactly once.
pub struct ProxyListener {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
}

impl ProxyListener {
    /// Bind on localhost and start accepting. Port 0 binds an ephemeral port;
    /// check `port()` for the actual one.
    pub async fn bind(port: u16, session: Arc<SessionState>) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|source| HarvesterError::Bind { port, source })?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let accept_task = tokio::spawn(accept_loop(listener, session, shutdown_rx));

        info!(addr = %local_addr, "Interception listener started");

        Ok(Self {
            local_addr,
            shutdown_tx,
            accept_task,
        })
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting and release the port. Connection tasks already in
    /// flight keep running to completion, so a response being written when
    /// shutdown lands is not aborted.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.accept_task.await;
        info!(addr = %self.local_addr, "Interception listener stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    session: Arc<SessionState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "Accepted connection");
                    let session = session.clone();
                    tokio::spawn(handle_connection(stream, session));
                }
                Err(e) => error!("Failed accepting connection: {}", e),
            },
        }
    }
}

/// Sniff the method off the socket, then hand the connection to the tunnel
/// relay or the HTTP router. The sniffed bytes travel with it either way.
async fn handle_connection(mut stream: TcpStream, session: Arc<SessionState>) {
    let mut sniffed = vec![0u8; CONNECT_PREFIX.len()];
    let mut filled = 0;

    while filled < sniffed.len() {
        match stream.read(&mut sniffed[filled..]).await {
            Ok(0) => return,
            Ok(n) => filled += n,
            Err(e) => {
                debug!("Client connection failed before request: {}", e);
                return;
            }
        }
        // A mismatch this early already rules CONNECT out.
        if sniffed[..filled] != CONNECT_PREFIX[..filled] {
            break;
        }
    }
    sniffed.truncate(filled);

    if sniffed == CONNECT_PREFIX {
        tunnel::handle_connect(stream, sniffed).await;
    } else {
        serve_http(Prefixed::new(sniffed, stream), session).await;
    }
}

/// Serve one plain-HTTP connection through the interception router.
/// Response-write errors are logged here and never escalated; hyper turns
/// malformed requests into 400s on its own.
async fn serve_http<S>(stream: S, session: Arc<SessionState>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| router::handle(session.clone(), req));

    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
        debug!("Failed sending response: {}", e);
    }
}

/// Stream adapter replaying sniffed bytes ahead of the underlying socket.
struct Prefixed<S> {
    prefix: Bytes,
    stream: S,
}

impl<S> Prefixed<S> {
    fn new(prefix: Vec<u8>, stream: S) -> Self {
        Self {
            prefix: Bytes::from(prefix),
            stream,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Prefixed<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.prefix.is_empty() {
            let n = this.prefix.len().min(buf.remaining());
            let chunk = this.prefix.split_to(n);
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.stream).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Prefixed<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tokio::io::AsyncWriteExt;

    fn session() -> Arc<SessionState> {
        Arc::new(SessionState::new(
            "example.test".to_string(),
            "ABC123".to_string(),
            PathBuf::from("./harvester-body.html"),
        ))
    }

    #[tokio::test]
    async fn test_prefixed_replays_before_stream() {
        let (client, mut server) = tokio::io::duplex(64);
        server.write_all(b" world").await.unwrap();

        let mut prefixed = Prefixed::new(b"hello".to_vec(), client);
        let mut buf = vec![0u8; 11];
        prefixed.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello world");
    }

    #[tokio::test]
    async fn test_shutdown_releases_port() {
        let listener = ProxyListener::bind(0, session()).await.unwrap();
        let port = listener.port();

        TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        listener.shutdown().await;

        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }

    #[tokio::test]
    async fn test_unmatched_request_gets_404() {
        let listener = ProxyListener::bind(0, session()).await.unwrap();
        let port = listener.port();

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        client
            .write_all(
                b"GET http://other.test/ HTTP/1.1\r\nHost: other.test\r\nConnection: close\r\n\r\n",
            )
            .await
            .unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8_lossy(&response);
        assert!(response.starts_with("HTTP/1.1 404"));

        listener.shutdown().await;
    }
}

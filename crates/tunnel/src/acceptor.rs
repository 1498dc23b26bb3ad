//! TCP accept loop shared by the entry and exit nodes: one task per
//! connection, at most `max_connections` alive at once.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, info_span, warn, Instrument};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept forever, spawning `handler` for every connection inside a span
/// tagged with `node`, a connection id and the peer address. The handler owns
/// its connection; nothing it does can reach the loop or its siblings.
pub async fn serve_connections<F, Fut>(
    listener: TcpListener,
    node: &'static str,
    max_connections: usize,
    handler: F,
) -> std::io::Result<()>
where
    F: Fn(TcpStream, SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let permits = Arc::new(Semaphore::new(max_connections));
    let handler = Arc::new(handler);
    let mut next_id: u64 = 0;
    loop {
        // Wait for a free slot before accepting so excess peers queue in the backlog.
        let permit = match permits.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => return Ok(()),
        };
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(node, error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        next_id += 1;
        let _ = stream.set_nodelay(true);
        let span = info_span!("conn", node, id = next_id, %peer);
        let handler = handler.clone();
        tokio::spawn(
            async move {
                debug!("accepted");
                handler(stream, peer).await;
                drop(permit);
            }
            .instrument(span),
        );
    }
}

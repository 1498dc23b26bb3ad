//! Exit relay loop for one entry-node connection.
//!
//! Flow:
//! 1. HANDSHAKE: recover the session key sent by the entry node
//! 2. RELAYING: receive one request frame, fetch from the origin, send one response frame
//! 3. CLOSED: shut the tunnel stream down, whatever ended the loop

use crate::config::ExitConfig;
use crate::origin::{self, OriginOptions};
use crate::target::{resolve_target, TargetSource};
use tokio::io::{AsyncRead, AsyncWrite};
use tunnel::{KeyPair, TunnelError, TunnelSession};
use tracing::{debug, info, warn};

/// Run one tunnel session to completion. Returns the number of requests
/// relayed when the entry node hung up cleanly.
pub async fn handle_entry_connection<S>(
    stream: S,
    keys: &KeyPair,
    config: &ExitConfig,
) -> Result<u64, TunnelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!(state = "HANDSHAKE", "exit relay");
    // A failed handshake drops `stream`, which closes it.
    let mut session = TunnelSession::accept(stream, keys, config.limits()).await?;

    debug!(state = "RELAYING", "exit relay");
    let result = relay(&mut session, config).await;

    debug!(state = "CLOSED", "exit relay");
    session.shutdown().await;
    result
}

async fn relay<S>(session: &mut TunnelSession<S>, config: &ExitConfig) -> Result<u64, TunnelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut served = 0u64;
    loop {
        let request = match session.receive().await {
            Ok(r) => r,
            Err(TunnelError::Closed) => return Ok(served),
            Err(e) => return Err(e),
        };
        let response = serve_request(&request, config).await;
        session.send(&response).await?;
        served += 1;
    }
}

/// Produce the response for one decrypted request. Origin failures become a
/// synthetic error response, so this never fails.
pub async fn serve_request(request: &[u8], config: &ExitConfig) -> Vec<u8> {
    let target = match resolve_target(request, &config.fallback_host, config.fallback_port) {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, kind = e.type_name(), "request refused");
            return e.to_http_response();
        }
    };

    match target.source {
        TargetSource::Fallback => warn!(
            method = %target.method,
            host = %target.host,
            port = target.port,
            source = %target.source,
            "degraded request, using fallback origin"
        ),
        _ => info!(
            method = %target.method,
            host = %target.host,
            port = target.port,
            source = %target.source,
            "relaying request"
        ),
    }

    let opts = OriginOptions {
        timeout: config.origin_timeout(),
        max_response_bytes: config.response_limit(),
    };
    match origin::fetch(&target, request, &opts).await {
        Ok(response) => {
            debug!(bytes = response.len(), "origin responded");
            response
        }
        Err(e) => {
            warn!(host = %target.host, port = target.port, error = %e, kind = e.type_name(), "origin request failed");
            e.to_http_response()
        }
    }
}

// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! WebSocket push channel for observers.
//!
//! Handles the RFC 6455 handshake over a hyper upgrade and runs one serve
//! loop per observer, draining the registry's outgoing queue into the socket.
//! Observers never have to send anything; the only inbound frame that matters
//! is Close.

use crate::observers::ObserverRegistry;
use base64::Engine;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use sha1::Digest;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info};

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Compute the `Sec-WebSocket-Accept` value from the client's request key.
///
/// The input string is trimmed of whitespace. If the client key is not valid
/// base64 or decodes to a length other than 16 bytes, this function returns
/// `None`, mirroring the requirements of RFC 6455.
pub fn compute_accept(key: &str) -> Option<String> {
    let key_trim = key.trim();
    // decode key to ensure it is 16 bytes long
    match base64::engine::general_purpose::STANDARD.decode(key_trim) {
        Ok(bytes) if bytes.len() == 16 => {
            let mut hasher = sha1::Sha1::new();
            hasher.update(key_trim.as_bytes());
            hasher.update(WS_GUID.as_bytes());
            let digest = hasher.finalize();
            Some(base64::engine::general_purpose::STANDARD.encode(digest))
        }
        _ => None,
    }
}

/// Whether a request is a well-formed WebSocket upgrade (RFC 6455 §4.2.1).
pub fn is_upgrade_request<B>(req: &Request<B>) -> bool {
    let headers = req.headers();
    headers
        .get("connection")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_ascii_lowercase().contains("upgrade"))
        .unwrap_or(false)
        && headers
            .get("upgrade")
            .and_then(|h| h.to_str().ok())
            .map(|s| s.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false)
        && headers.get("sec-websocket-key").is_some()
        && headers
            .get("sec-websocket-version")
            .and_then(|h| h.to_str().ok())
            .map(|s| s == "13")
            .unwrap_or(false)
}

/// Answer a WebSocket upgrade and hand the connection to an observer task.
///
/// Returns the `101 Switching Protocols` response immediately; the upgraded
/// I/O is claimed in a spawned task once hyper finishes the switch.
pub fn handle_upgrade<B>(
    req: Request<B>,
    registry: Arc<ObserverRegistry>,
) -> Response<BoxBody<Bytes, Infallible>>
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let accept = req
        .headers()
        .get("sec-websocket-key")
        .and_then(|v| v.to_str().ok())
        .and_then(compute_accept);
    let accept = match accept {
        Some(a) => a,
        None => {
            return Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .body(Full::new(Bytes::from("invalid websocket handshake")).boxed())
                .unwrap_or_else(|_| {
                    Response::new(Full::new(Bytes::from("invalid websocket handshake")).boxed())
                });
        }
    };

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                let ws =
                    WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None)
                        .await;
                serve_observer(ws, registry).await;
            }
            Err(e) => error!(%e, "websocket upgrade failed"),
        }
    });

    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Accept", accept)
        .body(Full::new(Bytes::new()).boxed())
        .unwrap_or_else(|e| {
            error!(%e, "failed to build 101 response");
            Response::new(Full::new(Bytes::new()).boxed())
        })
}

/// Per-observer serve loop: registry queue -> socket, watching for Close.
///
/// Generic over the transport so tests can drive it with an in-memory duplex
/// stream instead of a real upgraded connection.
pub async fn serve_observer<S>(ws: WebSocketStream<S>, registry: Arc<ObserverRegistry>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (id, mut rx) = registry.register();
    info!(observer = %id, clients = registry.count(), "observer connected");

    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                match outgoing {
                    Some(msg) => {
                        if let Err(e) = sink.send(msg).await {
                            debug!(observer = %id, error = %e, "observer send failed");
                            break;
                        }
                    }
                    // Sender side was dropped by the registry.
                    None => break,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    // Observers may ping or chatter; nothing is required of them.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(observer = %id, error = %e, "observer read failed");
                        break;
                    }
                }
            }
        }
    }

    registry.unregister(id);
    info!(observer = %id, clients = registry.count(), "observer disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketBuilder;
    use hyper::{HeaderMap, StatusCode};
    use rstest::rstest;
    use std::time::Duration;

    #[test]
    fn compute_accept_valid_key() {
        // example from RFC 6455 Appendix A.1
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let expected = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";
        assert_eq!(compute_accept(key).as_deref(), Some(expected));
    }

    #[test]
    fn compute_accept_trims_spaces() {
        let key = "  dGhlIHNhbXBsZSBub25jZQ==  ";
        let expected = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";
        assert_eq!(compute_accept(key).as_deref(), Some(expected));
    }

    #[test]
    fn compute_accept_invalid_length() {
        // decodes fine but wrong length
        let key = base64::engine::general_purpose::STANDARD.encode("not16bytes");
        assert_eq!(compute_accept(&key), None);
    }

    #[test]
    fn compute_accept_invalid_base64() {
        assert_eq!(compute_accept("!!notbase64!!"), None);
    }

    fn upgrade_request(headers: &[(&str, &str)]) -> Request<Full<Bytes>> {
        let mut builder = Request::builder().method("GET").uri("/ws");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(Full::new(Bytes::new())).expect("request")
    }

    #[rstest]
    #[case(&[
        ("connection", "Upgrade"),
        ("upgrade", "websocket"),
        ("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="),
        ("sec-websocket-version", "13"),
    ], true)]
    #[case(&[
        ("connection", "keep-alive, Upgrade"),
        ("upgrade", "WebSocket"),
        ("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="),
        ("sec-websocket-version", "13"),
    ], true)]
    #[case(&[
        ("upgrade", "websocket"),
        ("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="),
        ("sec-websocket-version", "13"),
    ], false)]
    #[case(&[
        ("connection", "Upgrade"),
        ("upgrade", "websocket"),
        ("sec-websocket-version", "13"),
    ], false)]
    #[case(&[
        ("connection", "Upgrade"),
        ("upgrade", "websocket"),
        ("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="),
        ("sec-websocket-version", "8"),
    ], false)]
    fn upgrade_request_validation(#[case] headers: &[(&str, &str)], #[case] expected: bool) {
        let req = upgrade_request(headers);
        assert_eq!(is_upgrade_request(&req), expected);
    }

    #[test]
    fn handle_upgrade_rejects_bad_key() {
        let registry = Arc::new(ObserverRegistry::new());
        let req = upgrade_request(&[
            ("connection", "Upgrade"),
            ("upgrade", "websocket"),
            ("sec-websocket-key", "!!notbase64!!"),
            ("sec-websocket-version", "13"),
        ]);
        // Needs a runtime because handle_upgrade spawns the upgrade task.
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        let resp = rt.block_on(async { handle_upgrade(req, registry) });
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn serve_observer_delivers_broadcast_and_unregisters_on_close() {
        let registry = Arc::new(ObserverRegistry::new());

        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let server_ws = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let mut client_ws =
            WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;

        let serve = tokio::spawn(serve_observer(server_ws, registry.clone()));

        // Wait for the observer to register.
        for _ in 0..50 {
            if registry.count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(registry.count(), 1);

        let headers = HeaderMap::new();
        let packet = PacketBuilder::new("GET", "https://api.example.com/player/1", &headers)
            .status(StatusCode::OK)
            .build();
        registry.broadcast(&packet);

        let frame = tokio::time::timeout(Duration::from_secs(2), client_ws.next())
            .await
            .expect("frame within timeout")
            .expect("stream open")
            .expect("frame ok");
        let v: serde_json::Value =
            serde_json::from_str(frame.to_text().expect("text frame")).expect("packet json");
        assert_eq!(v["id"].as_str(), Some(packet.id.as_str()));
        assert_eq!(v["isGame"].as_bool(), Some(true));

        // A clean close must remove the observer from the registry.
        client_ws
            .send(Message::Close(None))
            .await
            .expect("send close");
        tokio::time::timeout(Duration::from_secs(2), serve)
            .await
            .expect("serve loop ends")
            .expect("serve task join");
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn serve_observer_handles_abrupt_disconnect() {
        let registry = Arc::new(ObserverRegistry::new());

        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let server_ws = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;

        let serve = tokio::spawn(serve_observer(server_ws, registry.clone()));
        for _ in 0..50 {
            if registry.count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Drop the transport without a Close frame.
        drop(client_io);
        tokio::time::timeout(Duration::from_secs(2), serve)
            .await
            .expect("serve loop ends")
            .expect("serve task join");
        assert_eq!(registry.count(), 0);
    }
}

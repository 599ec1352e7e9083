// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Proxy front: listening socket, routing, and the capture pipeline.

use crate::assets;
use crate::config::{Config, ProxyMode};
use crate::forward::{self, ForwardError, HttpsClient};
use crate::observers::ObserverRegistry;
use crate::packet::PacketBuilder;
use crate::ws;
use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Incoming;
use hyper::{service::service_fn, Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoConnBuilder;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, warn};

type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<Response<BoxBody<Bytes, Infallible>>, Infallible>> + Send>>;

/// Reserved path for the observer push channel.
pub const WS_PATH: &str = "/ws";
/// Reserved path for the liveness endpoint.
pub const HEALTH_PATH: &str = "/health";

struct Shared {
    client: HttpsClient,
    registry: Arc<ObserverRegistry>,
    cfg: Arc<Config>,
    started: Instant,
}

pub async fn run_proxy(
    listen: SocketAddr,
    registry: Arc<ObserverRegistry>,
    cfg: Arc<Config>,
) -> anyhow::Result<()> {
    // Default behavior: no accept limit (runs forever)
    run_proxy_with_limit(listen, registry, cfg, None).await
}

/// Testable variant of `run_proxy` that accepts an optional `accept_limit`.
/// When `accept_limit` is `Some(n)`, the accept loop will accept `n`
/// connections and then return after accepting the Nth connection.
/// Connection handlers are spawned asynchronously and may still be running
/// when this function returns.
pub async fn run_proxy_with_limit(
    listen: SocketAddr,
    registry: Arc<ObserverRegistry>,
    cfg: Arc<Config>,
    accept_limit: Option<usize>,
) -> anyhow::Result<()> {
    let client = forward::build_client()?;

    let shared = Arc::new(Shared {
        client,
        registry,
        cfg,
        started: Instant::now(),
    });

    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(%listen, mode = ?shared.cfg.proxy.mode, "listening");

    let executor = TokioExecutor::new();
    let server_builder = AutoConnBuilder::new(executor);

    let mut remaining = accept_limit;
    loop {
        if let Some(0) = remaining {
            break;
        }

        let (stream, remote_addr) = listener.accept().await?;

        if let Some(ref mut n) = remaining {
            *n -= 1;
        }

        let shared = shared.clone();
        let builder_clone = server_builder.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let shared = shared.clone();
                let fut: ServiceFuture = Box::pin(async move { handle_request(req, shared).await });
                fut
            });

            let io = TokioIo::new(stream);
            if let Err(e) = builder_clone
                .serve_connection_with_upgrades(io, service)
                .await
            {
                error!(%remote_addr, %e, "connection error");
            }
        });
    }

    Ok(())
}

async fn handle_request<B>(
    req: Request<B>,
    shared: Arc<Shared>,
) -> Result<Response<BoxBody<Bytes, Infallible>>, Infallible>
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    if req.method() == Method::CONNECT {
        // No MITM pipeline; the scheme is reported as observed instead.
        return Ok(text_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "CONNECT not supported",
        ));
    }

    let path = req.uri().path().to_string();

    if path == HEALTH_PATH && req.method() == Method::GET {
        return Ok(health_response(&shared));
    }

    if path == WS_PATH && ws::is_upgrade_request(&req) {
        return Ok(ws::handle_upgrade(req, shared.registry.clone()));
    }

    match shared.cfg.proxy.mode {
        ProxyMode::Explicit => {
            if path.starts_with(shared.cfg.proxy.prefix.as_str()) {
                Ok(handle_forward(req, shared).await)
            } else if req.method() == Method::GET {
                Ok(assets::serve(&shared.cfg.general.static_dir, &path).await)
            } else {
                Ok(text_response(StatusCode::NOT_FOUND, "not found"))
            }
        }
        ProxyMode::Transparent => Ok(handle_forward(req, shared).await),
    }
}

/// Forward one request and run the capture pipeline for it.
///
/// The pipeline is strictly sequential per request: forward, accumulate,
/// build packet, broadcast, answer the caller. Broadcast failures never
/// reach the caller.
async fn handle_forward<B>(req: Request<B>, shared: Arc<Shared>) -> Response<BoxBody<Bytes, Infallible>>
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let started = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let req_headers = req.headers().clone();

    let target = match forward::resolve_target(&shared.cfg, &uri, &req_headers) {
        Ok(t) => t,
        Err(e) => {
            // No exchange was attempted; the caller alone hears about it.
            return proxy_error_response(StatusCode::BAD_REQUEST, &e.to_string(), uri.path());
        }
    };
    let target_url = target.uri.to_string();

    let body_bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let boxed: Box<dyn std::error::Error + Send + Sync> = e.into();
            error!("failed to collect request body: {}", boxed);
            return proxy_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "request body collect error",
                &target_url,
            );
        }
    };

    match forward::forward(
        &shared.client,
        &target,
        &method,
        &req_headers,
        body_bytes.clone(),
        shared.cfg.upstream_timeout(),
    )
    .await
    {
        Ok(outcome) => {
            let duration = started.elapsed().as_millis() as u64;

            let packet = PacketBuilder::new(method.as_str(), &target_url, &req_headers)
                .request_body(body_bytes)
                .status(outcome.status)
                .response_headers(&outcome.headers)
                .response_body(outcome.body.clone())
                .duration_ms(duration)
                .build();
            let observers = shared.registry.broadcast(&packet);
            info!(
                method = %method,
                status = outcome.status.as_u16(),
                target = %target_url,
                duration_ms = duration,
                observers,
                "forwarded"
            );

            let mut resp_builder = Response::builder().status(outcome.status);
            let connection_tokens =
                forward::parse_connection_tokens(outcome.headers.get(hyper::header::CONNECTION));
            for (name, value) in outcome.headers.iter() {
                let name_str = name.as_str().to_ascii_lowercase();
                if forward::is_hop_by_hop_header(&name_str, &connection_tokens) {
                    continue;
                }
                resp_builder = resp_builder.header(name, value);
            }
            resp_builder
                .body(Full::new(outcome.body.clone()).boxed())
                .unwrap_or_else(|_| Response::new(Full::new(outcome.body.clone()).boxed()))
        }
        Err(ForwardError::Resolve(msg)) => {
            proxy_error_response(StatusCode::BAD_REQUEST, &msg, &target_url)
        }
        Err(ForwardError::Upstream { url, message }) => {
            let duration = started.elapsed().as_millis() as u64;

            // Failed exchanges stay visible to observers as flagged packets.
            let packet = PacketBuilder::new(method.as_str(), &url, &req_headers)
                .request_body(body_bytes)
                .status(StatusCode::BAD_GATEWAY)
                .duration_ms(duration)
                .error(&message)
                .build();
            shared.registry.broadcast(&packet);
            warn!(method = %method, target = %url, error = %message, "forward failed");

            proxy_error_response(StatusCode::BAD_GATEWAY, &message, &url)
        }
    }
}

fn health_response(shared: &Shared) -> Response<BoxBody<Bytes, Infallible>> {
    let body = serde_json::json!({
        "status": "ok",
        "clients": shared.registry.count(),
        "uptime": shared.started.elapsed().as_secs(),
    });
    json_response(StatusCode::OK, &body)
}

fn proxy_error_response(
    status: StatusCode,
    message: &str,
    url: &str,
) -> Response<BoxBody<Bytes, Infallible>> {
    let body = serde_json::json!({
        "error": "proxy error",
        "message": message,
        "url": url,
    });
    json_response(status, &body)
}

fn json_response(
    status: StatusCode,
    body: &serde_json::Value,
) -> Response<BoxBody<Bytes, Infallible>> {
    let bytes = Bytes::from(body.to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(bytes.clone()).boxed())
        .unwrap_or_else(|_| Response::new(Full::new(bytes.clone()).boxed()))
}

fn text_response(status: StatusCode, message: &'static str) -> Response<BoxBody<Bytes, Infallible>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(message)).boxed())
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from(message)).boxed()))
}

// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Upstream forwarding: target resolution, request relay, and full
//! accumulation of the response body.

use crate::config::{Config, ProxyMode};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderMap, HeaderValue, HOST, LOCATION};
use hyper::{Method, Request, StatusCode, Uri};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client as LegacyClient;
use hyper_util::rt::TokioExecutor;
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

/// Shared upstream client: HTTP/1 + HTTP/2 over plain TCP or TLS with
/// native roots.
pub type HttpsClient = LegacyClient<
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
    Full<Bytes>,
>;

pub fn build_client() -> anyhow::Result<HttpsClient> {
    let https = HttpsConnectorBuilder::new()
        .with_native_roots()?
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .build();
    Ok(LegacyClient::builder(TokioExecutor::new()).build(https))
}

/// Redirect hops followed in explicit-target mode before giving up.
pub const MAX_REDIRECTS: usize = 5;

// RFC 7230 Section 6.1: Hop-by-hop headers must not be forwarded by proxies.
static HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Where a forward should go and how redirects are treated once there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub uri: Uri,
    /// Explicit mode acts as a client-side fetch and chases redirects;
    /// transparent mode relays them to the caller untouched.
    pub follow_redirects: bool,
}

/// Why a forward did not produce an upstream response.
#[derive(Debug)]
pub enum ForwardError {
    /// Malformed or missing target; nothing was sent upstream.
    Resolve(String),
    /// A resolved target could not be reached or failed mid-transfer.
    Upstream { url: String, message: String },
}

impl std::fmt::Display for ForwardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForwardError::Resolve(msg) => write!(f, "target resolution failed: {}", msg),
            ForwardError::Upstream { url, message } => {
                write!(f, "upstream {} failed: {}", url, message)
            }
        }
    }
}

impl std::error::Error for ForwardError {}

/// A completed upstream exchange with the body fully accumulated.
#[derive(Debug)]
pub struct ForwardOutcome {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// The entire response body. Accumulation finishes before this value
    /// exists, so no partial body ever escapes this module.
    pub body: Bytes,
}

/// Resolve the upstream target for an inbound request.
pub fn resolve_target(
    cfg: &Config,
    uri: &Uri,
    headers: &HeaderMap,
) -> Result<ResolvedTarget, ForwardError> {
    match cfg.proxy.mode {
        ProxyMode::Explicit => {
            let path_and_query = uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or_default();
            let raw = path_and_query
                .strip_prefix(cfg.proxy.prefix.as_str())
                .ok_or_else(|| {
                    ForwardError::Resolve(format!(
                        "path does not start with {}",
                        cfg.proxy.prefix
                    ))
                })?;
            let target: Uri = raw
                .parse()
                .map_err(|e| ForwardError::Resolve(format!("invalid target url {:?}: {}", raw, e)))?;
            match target.scheme_str() {
                Some("http") | Some("https") if target.host().is_some() => Ok(ResolvedTarget {
                    uri: target,
                    follow_redirects: true,
                }),
                _ => Err(ForwardError::Resolve(format!(
                    "target {:?} is not an absolute http(s) url",
                    raw
                ))),
            }
        }
        ProxyMode::Transparent => {
            let host = headers
                .get(HOST)
                .and_then(|h| h.to_str().ok())
                .ok_or_else(|| ForwardError::Resolve("missing Host header".to_string()))?;
            let scheme = headers
                .get("x-forwarded-proto")
                .and_then(|h| h.to_str().ok())
                .filter(|s| s.eq_ignore_ascii_case("https"))
                .map(|_| "https")
                .unwrap_or("http");
            let path = uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            let target: Uri = format!("{}://{}{}", scheme, host, path)
                .parse()
                .map_err(|e| ForwardError::Resolve(format!("invalid Host {:?}: {}", host, e)))?;
            Ok(ResolvedTarget {
                uri: target,
                follow_redirects: false,
            })
        }
    }
}

/// Forward one request to its resolved target and accumulate the response.
///
/// The whole operation, connect through body completion, runs under
/// `timeout`. Every upstream status is a successful outcome; only transport
/// failures and the redirect cap surface as errors.
pub async fn forward(
    client: &HttpsClient,
    target: &ResolvedTarget,
    method: &Method,
    headers: &HeaderMap,
    body: Bytes,
    timeout: Duration,
) -> Result<ForwardOutcome, ForwardError> {
    let url = target.uri.to_string();
    match tokio::time::timeout(timeout, forward_inner(client, target, method, headers, body)).await
    {
        Ok(res) => res,
        Err(_) => Err(ForwardError::Upstream {
            url,
            message: format!("timed out after {}s", timeout.as_secs()),
        }),
    }
}

async fn forward_inner(
    client: &HttpsClient,
    target: &ResolvedTarget,
    method: &Method,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<ForwardOutcome, ForwardError> {
    let mut current_uri = target.uri.clone();
    let mut current_method = method.clone();
    let mut current_body = body;
    let mut hops = 0usize;

    loop {
        let upstream_req =
            build_upstream_request(&current_method, &current_uri, headers, current_body.clone())
                .map_err(|e| ForwardError::Upstream {
                    url: current_uri.to_string(),
                    message: format!("failed to build request: {}", e),
                })?;

        let resp = client
            .request(upstream_req)
            .await
            .map_err(|e| ForwardError::Upstream {
                url: current_uri.to_string(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if target.follow_redirects && status.is_redirection() {
            if let Some(location) = resp
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|loc| resolve_location(&current_uri, loc))
            {
                if hops == MAX_REDIRECTS {
                    return Err(ForwardError::Upstream {
                        url: target.uri.to_string(),
                        message: format!("more than {} redirects", MAX_REDIRECTS),
                    });
                }
                hops += 1;
                debug!(from = %current_uri, to = %location, hop = hops, "following redirect");
                // 303 always demotes to GET; so do the legacy 301/302 for
                // non-idempotent methods. 307/308 preserve method and body.
                if status == StatusCode::SEE_OTHER
                    || ((status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::FOUND)
                        && current_method != Method::GET
                        && current_method != Method::HEAD)
                {
                    current_method = Method::GET;
                    current_body = Bytes::new();
                }
                current_uri = location;
                continue;
            }
        }

        let resp_headers = resp.headers().clone();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| ForwardError::Upstream {
                url: current_uri.to_string(),
                message: format!("body collect failed: {}", e),
            })?
            .to_bytes();

        return Ok(ForwardOutcome {
            status,
            headers: resp_headers,
            body,
        });
    }
}

/// Build the request sent upstream: original method and body, hop-by-hop
/// headers stripped, Host rewritten to the resolved target authority.
fn build_upstream_request(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> anyhow::Result<Request<Full<Bytes>>> {
    let mut builder = Request::builder().method(method.clone()).uri(uri.clone());

    let connection_tokens = parse_connection_tokens(headers.get(hyper::header::CONNECTION));
    for (name, value) in headers.iter() {
        let name_str = name.as_str().to_ascii_lowercase();
        // Host is rewritten below; content-length is re-derived from the
        // buffered body (it would go stale when a redirect drops the body).
        if name_str == "host"
            || name_str == "content-length"
            || is_hop_by_hop_header(&name_str, &connection_tokens)
        {
            continue;
        }
        builder = builder.header(name, value);
    }

    // Virtual-hosting upstreams route on Host; it must name the target, not
    // the proxy.
    if let Some(authority) = uri.authority() {
        builder = builder.header(HOST, HeaderValue::from_str(authority.as_str())?);
    }

    Ok(builder.body(Full::new(body))?)
}

/// Resolve a `Location` header value against the URI that produced it.
fn resolve_location(base: &Uri, location: &str) -> Option<Uri> {
    if let Ok(uri) = location.parse::<Uri>() {
        if uri.scheme().is_some() {
            return Some(uri);
        }
    }

    let scheme = base.scheme_str()?;
    let authority = base.authority()?.as_str();
    if location.starts_with('/') {
        return format!("{}://{}{}", scheme, authority, location).parse().ok();
    }

    // Relative reference: resolve against the directory of the base path.
    let base_path = base.path();
    let dir = &base_path[..base_path.rfind('/').map(|i| i + 1).unwrap_or(0)];
    format!("{}://{}{}{}", scheme, authority, dir, location)
        .parse()
        .ok()
}

// Parse a Connection header value into a lowercased set of tokens
pub fn parse_connection_tokens(val: Option<&HeaderValue>) -> HashSet<String> {
    let mut set = HashSet::new();
    if let Some(conn_val) = val {
        if let Ok(conn_str) = conn_val.to_str() {
            for token in conn_str.split(',') {
                let trimmed = token.trim().to_ascii_lowercase();
                if !trimmed.is_empty() {
                    set.insert(trimmed);
                }
            }
        }
    }
    set
}

pub fn is_hop_by_hop_header(name: &str, connection_tokens: &HashSet<String>) -> bool {
    connection_tokens.contains(name) || HOP_BY_HOP_HEADERS.contains(&name)
}

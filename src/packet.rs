// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Canonical capture record built from one completed exchange.

use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hyper::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Sentinel used when the upstream response carries no `content-type`.
pub const UNKNOWN_CONTENT_TYPE: &str = "unknown";

/// Scheme of the resolved target, as observed (never by terminating TLS).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "HTTPS")]
    Https,
}

impl Protocol {
    fn from_url(url: &str) -> Self {
        if url.starts_with("https") {
            Protocol::Https
        } else {
            Protocol::Http
        }
    }
}

/// How a captured body is represented in the packet text fields.
///
/// Bodies that decode as UTF-8 are carried verbatim; anything else is
/// base64-encoded so the original bytes remain recoverable.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyEncoding {
    #[default]
    #[serde(rename = "utf-8")]
    Utf8,
    #[serde(rename = "base64")]
    Base64,
}

impl BodyEncoding {
    pub fn is_utf8(&self) -> bool {
        matches!(self, BodyEncoding::Utf8)
    }
}

/// Convert raw body bytes into their reversible textual representation.
pub fn body_to_text(bytes: &[u8]) -> (String, BodyEncoding) {
    match std::str::from_utf8(bytes) {
        Ok(s) => (s.to_string(), BodyEncoding::Utf8),
        Err(_) => (
            base64::engine::general_purpose::STANDARD.encode(bytes),
            BodyEncoding::Base64,
        ),
    }
}

/// Immutable record describing one fully-completed request/response exchange.
///
/// Built once the full response body has been accumulated (or the forward has
/// failed), then broadcast as-is; never mutated afterwards.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Packet {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub url: String,
    pub full_url: String,
    pub protocol: Protocol,
    pub is_secure: bool,
    pub status_code: u16,
    pub status_message: String,
    /// Milliseconds between forward start and response-body completion.
    pub duration: u64,
    /// Exact byte length of the accumulated response body, not the
    /// header-declared length.
    pub size: u64,
    pub request_headers: HashMap<String, String>,
    pub response_headers: HashMap<String, String>,
    pub request_body: String,
    #[serde(default, skip_serializing_if = "BodyEncoding::is_utf8")]
    pub request_body_encoding: BodyEncoding,
    pub response_body: String,
    #[serde(default, skip_serializing_if = "BodyEncoding::is_utf8")]
    pub response_body_encoding: BodyEncoding,
    pub content_type: String,
    pub is_game: bool,
    pub process_id: u32,
    /// Diagnostic message, present only on packets for failed forwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Builder assembling a [`Packet`] from whatever the forward produced.
///
/// Pure assembly, no I/O. Missing upstream fields substitute defaults
/// (empty bodies, [`UNKNOWN_CONTENT_TYPE`]) rather than failing.
pub struct PacketBuilder<'a> {
    method: &'a str,
    url: &'a str,
    request_headers: &'a HeaderMap,
    request_body: Bytes,
    status: u16,
    status_message: String,
    response_headers: Option<&'a HeaderMap>,
    response_body: Bytes,
    duration_ms: u64,
    error: Option<String>,
}

impl<'a> PacketBuilder<'a> {
    pub fn new(method: &'a str, url: &'a str, request_headers: &'a HeaderMap) -> Self {
        Self {
            method,
            url,
            request_headers,
            request_body: Bytes::new(),
            status: 0,
            status_message: String::new(),
            response_headers: None,
            response_body: Bytes::new(),
            duration_ms: 0,
            error: None,
        }
    }

    pub fn request_body(mut self, body: Bytes) -> Self {
        self.request_body = body;
        self
    }

    pub fn status(mut self, status: hyper::StatusCode) -> Self {
        self.status = status.as_u16();
        self.status_message = status.canonical_reason().unwrap_or_default().to_string();
        self
    }

    pub fn response_headers(mut self, headers: &'a HeaderMap) -> Self {
        self.response_headers = Some(headers);
        self
    }

    pub fn response_body(mut self, body: Bytes) -> Self {
        self.response_body = body;
        self
    }

    pub fn duration_ms(mut self, duration: u64) -> Self {
        self.duration_ms = duration;
        self
    }

    /// Flag the packet as describing a failed forward.
    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    pub fn build(self) -> Packet {
        let (request_body, request_body_encoding) = body_to_text(&self.request_body);
        let (response_body, response_body_encoding) = body_to_text(&self.response_body);

        let content_type = self
            .response_headers
            .and_then(|h| h.get("content-type"))
            .and_then(|v| v.to_str().ok())
            .unwrap_or(UNKNOWN_CONTENT_TYPE)
            .to_string();

        // Classify over the response body when there is one, otherwise over
        // the request body.
        let classify_body = if response_body.is_empty() {
            &request_body
        } else {
            &response_body
        };
        let is_game = crate::classify::is_game_traffic(self.url, self.request_headers, classify_body);

        Packet {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            method: self.method.to_string(),
            url: self.url.to_string(),
            full_url: self.url.to_string(),
            protocol: Protocol::from_url(self.url),
            is_secure: matches!(Protocol::from_url(self.url), Protocol::Https),
            status_code: self.status,
            status_message: self.status_message,
            duration: self.duration_ms,
            size: self.response_body.len() as u64,
            request_headers: headers_to_map(self.request_headers),
            response_headers: self.response_headers.map(headers_to_map).unwrap_or_default(),
            request_body,
            request_body_encoding,
            response_body,
            response_body_encoding,
            content_type,
            is_game,
            process_id: std::process::id(),
            error: self.error,
        }
    }
}

/// Flatten a `HeaderMap` into name -> value, joining repeats with `", "`.
fn headers_to_map(h: &HeaderMap) -> HashMap<String, String> {
    let mut m: HashMap<String, String> = HashMap::with_capacity(h.len());
    for (k, v) in h.iter() {
        if let Ok(s) = v.to_str() {
            m.entry(k.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(s);
                })
                .or_insert_with(|| s.to_string());
        }
    }
    m
}

// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! HTTP(S) traffic-inspection proxy with real-time packet streaming.
//!
//! This library provides the core functionality for wirelens: request
//! forwarding, packet construction and classification, and the WebSocket
//! push channel fanning packets out to observers.

pub mod assets;
pub mod classify;
pub mod config;
pub mod forward;
pub mod observers;
pub mod packet;
pub mod proxy;
pub mod ws;

// Keep library small; main.rs remains the binary entrypoint.

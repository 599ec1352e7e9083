// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

use tracing::{error, info, warn};
use wirelens::{config, observers::ObserverRegistry, proxy};

#[derive(Parser, Debug)]
#[command(name = "wirelens")]
struct Args {
    /// Listen address, e.g. 127.0.0.1:3000 (overrides the config file)
    #[arg(long)]
    listen: Option<String>,

    /// Optional config TOML path
    #[arg(long)]
    config: Option<String>,

    /// Target resolution mode: explicit or transparent (overrides the config file)
    #[arg(long)]
    mode: Option<String>,
}

fn apply_overrides(cfg: &mut config::Config, args: &Args) {
    if let Some(ref listen) = args.listen {
        cfg.general.listen = listen.clone();
    }
    if let Some(ref mode) = args.mode {
        match mode.as_str() {
            "explicit" => cfg.proxy.mode = config::ProxyMode::Explicit,
            "transparent" => cfg.proxy.mode = config::ProxyMode::Transparent,
            other => warn!(%other, "unknown mode, keeping configured value"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    // Load config: optional CLI path; defaults if not provided
    let mut cfg = if let Some(ref p) = args.config {
        config::Config::load_from_path(p).await.unwrap_or_else(|e| {
            warn!(%p, %e, "failed to load config, using defaults");
            config::Config::default()
        })
    } else {
        config::Config::default()
    };
    apply_overrides(&mut cfg, &args);

    let addr: SocketAddr = cfg.general.listen.parse()?;
    let registry = Arc::new(ObserverRegistry::new());

    let server = proxy::run_proxy(addr, registry, Arc::new(cfg));

    tokio::select! {
        res = server => {
            if let Err(e) = res {
                error!(%e, "server error");
            }
        }
        _ = signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    Ok(())
}

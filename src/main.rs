//! HTTP ingress controller.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────────┐
//!                        │                 INGRESS CONTROLLER                   │
//!                        │                                                      │
//!   Client Request       │  ┌─────────┐    ┌─────────┐    ┌──────────────┐      │
//!   ─────────────────────┼─▶│   net   │───▶│  http   │───▶│    proxy     │      │
//!                        │  │  (TLS)  │    │ server  │    │    engine    │      │
//!                        │  └─────────┘    └─────────┘    └──────┬───────┘      │
//!                        │                                       │ match        │
//!                        │                                       ▼              │
//!                        │  ┌──────────┐  snapshot   ┌──────────────┐          │
//!                        │  │ routing  │────────────▶│load_balancer │          │
//!                        │  │  table   │             │   + pool     │          │
//!                        │  └────▲─────┘             └──────┬───────┘          │
//!                        │       │ deltas                   │                  │
//!                        │  ┌────┴──────┐ ┌────────┐        ▼                  │
//!                        │  │ discovery │ │ health │   upstream conn ─────────┼──▶ Endpoint
//!                        │  │  watcher  │ │checker │                           │
//!                        │  └───────────┘ └────────┘                           │
//!                        │                                                      │
//!                        │  config · observability · admin · lifecycle          │
//!                        └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use ingress_controller::lifecycle;

#[derive(Parser)]
#[command(name = "ingress-controller")]
#[command(about = "HTTP ingress controller with dynamic endpoint discovery", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "ingress.toml")]
    config: PathBuf,

    /// Reload routes and services when the config file changes
    #[arg(short, long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Ignored if another provider was installed first
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    lifecycle::run(&cli.config, cli.watch).await?;
    Ok(())
}

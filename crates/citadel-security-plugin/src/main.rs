//! Out-of-process Citadel node for security operations.
//!
//! Launched by a Citadel host over stdio. Stdout carries the plugin protocol,
//! so all logging goes to stderr.

use citadel_core::plugins::{serve, HandshakeConfig};

mod operations;
mod plugin;

use plugin::SecurityPlugin;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    if let Err(e) = serve(SecurityPlugin, &HandshakeConfig::default()).await {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

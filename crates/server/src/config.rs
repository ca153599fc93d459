// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

/// VibeTunnel server configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "vibetunnel", version, about = "Terminal sessions over the network.")]
pub struct ServerConfig {
    /// Host address to bind to.
    #[arg(long, env = "VIBETUNNEL_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// HTTP port to listen on.
    #[arg(long, env = "VIBETUNNEL_PORT", default_value_t = 4020)]
    pub port: u16,

    /// Root of the per-session control directories.
    /// Defaults to `~/.vibetunnel/control`.
    #[arg(long, env = "VIBETUNNEL_CONTROL_DIR")]
    pub control_dir: Option<PathBuf>,

    /// Disable authentication entirely.
    #[arg(long, env = "VIBETUNNEL_NO_AUTH")]
    pub no_auth: bool,

    /// TERM exported to child processes.
    #[arg(long, env = "VIBETUNNEL_TERM", default_value = "xterm-256color")]
    pub term: String,

    /// Run as an HQ, federating registered peer servers.
    #[arg(long, env = "VIBETUNNEL_HQ")]
    pub hq: bool,

    /// URL of an HQ to register with (peer mode).
    #[arg(long, env = "VIBETUNNEL_HQ_URL")]
    pub hq_url: Option<String>,

    /// Bearer token used when registering with the HQ.
    #[arg(long, env = "VIBETUNNEL_HQ_TOKEN")]
    pub hq_token: Option<String>,

    /// Name this server registers under at the HQ.
    #[arg(long, env = "VIBETUNNEL_NAME")]
    pub name: Option<String>,

    /// Externally reachable URL of this server, sent to the HQ.
    #[arg(long, env = "VIBETUNNEL_ADVERTISE_URL")]
    pub advertise_url: Option<String>,
}

impl ServerConfig {
    /// Validate flag combinations after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.hq && self.hq_url.is_some() {
            anyhow::bail!("--hq and --hq-url are mutually exclusive");
        }
        if self.hq_url.is_some() && self.name.is_none() {
            anyhow::bail!("--hq-url requires --name");
        }
        if self.hq_url.is_some() && self.advertise_url.is_none() {
            anyhow::bail!("--hq-url requires --advertise-url");
        }
        Ok(())
    }

    /// Resolve the control directory, defaulting to `~/.vibetunnel/control`.
    pub fn control_root(&self) -> PathBuf {
        if let Some(ref dir) = self.control_dir {
            return dir.clone();
        }
        let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
        home.join(".vibetunnel").join("control")
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

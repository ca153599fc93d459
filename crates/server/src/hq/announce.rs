// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Peer-side registration with an HQ.

use std::sync::Arc;
use std::time::Duration;

use crate::state::AppState;

/// Interval between heartbeat re-registrations.
const HEARTBEAT: Duration = Duration::from_secs(30);

/// Register this server with the configured HQ and keep the registration
/// fresh. Registration failures retry with backoff; the server keeps
/// serving locally either way.
pub fn spawn_announcer(state: Arc<AppState>) {
    let Some(hq_url) = state.config.hq_url.clone() else { return };
    let name = state.config.name.clone().unwrap_or_else(|| "peer".to_owned());
    let advertise_url = state.config.advertise_url.clone().unwrap_or_default();
    let hq_token = state.config.hq_token.clone().unwrap_or_default();
    let cancel = state.shutdown.clone();

    // Token the HQ presents back to us on proxied calls.
    let access_token = state.auth.issue("hq", 0).unwrap_or_default();
    let id = uuid::Uuid::new_v4().to_string();

    tokio::spawn(async move {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        let endpoint = format!("{}/api/remotes/register", hq_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "id": id,
            "name": name,
            "url": advertise_url,
            "token": access_token,
        });

        let mut backoff_ms = 500u64;
        let mut registered = false;
        loop {
            let req = client.post(&endpoint).bearer_auth(&hq_token).json(&body);
            match req.send().await.and_then(|r| r.error_for_status()) {
                Ok(_) => {
                    if !registered {
                        tracing::info!(hq = %hq_url, name = %name, "registered with HQ");
                        registered = true;
                    }
                    backoff_ms = 500;
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(HEARTBEAT) => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(hq = %hq_url, err = %e, "HQ registration failed, retrying");
                    registered = false;
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
                    }
                    backoff_ms = (backoff_ms * 2).min(15_000);
                }
            }
        }
    });
}

use reqwest::Client;
use std::time::Duration;
use tracing::warn;

/// Build the shared HTTP client used for all calls to the model server.
/// One client instance is held per provider and reused across concurrent
/// requests; connection pooling is left to reqwest.
pub fn build_http_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to build HTTP client, using default");
            Client::new()
        })
}

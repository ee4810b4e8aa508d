//! Push notification delivery.
//!
//! Best-effort HTTP POST of update envelopes to client-supplied
//! callback URLs. 5xx responses and timeouts retry with exponential
//! backoff; 4xx responses are logged and dropped, since retrying a
//! rejected delivery cannot help. Ordering per target is the caller's
//! concern (the task manager drains one queue per config).

use devgrid_a2a::{PushNotificationConfig, StreamEvent};
use std::time::Duration;
use uuid::Uuid;

const MAX_ATTEMPTS: u32 = 6;
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Header carrying a per-delivery id, stable across retries, for
/// client-side dedup.
pub const DELIVERY_ID_HEADER: &str = "X-Devgrid-Delivery-Id";
/// Header echoing the config's validation token.
pub const NOTIFICATION_TOKEN_HEADER: &str = "X-A2A-Notification-Token";

pub struct PushNotifier {
    http: reqwest::Client,
    attempt_timeout: Duration,
}

impl PushNotifier {
    pub fn new(attempt_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            attempt_timeout,
        }
    }

    /// Deliver one event envelope, retrying per policy. Exhausted
    /// retries are abandoned silently; the subscriber reconciles via
    /// `tasks/get`.
    pub async fn deliver(&self, config: &PushNotificationConfig, event: &StreamEvent) {
        // A JSON-RPC notification: no id, no response expected.
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "tasks/update",
            "params": event,
        });
        let delivery_id = Uuid::new_v4().to_string();

        for attempt in 0..MAX_ATTEMPTS {
            let mut request = self
                .http
                .post(&config.url)
                .timeout(self.attempt_timeout)
                .header("Content-Type", "application/json")
                .header(DELIVERY_ID_HEADER, &delivery_id)
                .json(&body);

            if let Some(token) = &config.token {
                request = request.header(NOTIFICATION_TOKEN_HEADER, token);
            }
            if let Some(auth) = &config.authentication {
                if let Some(credentials) = &auth.credentials {
                    if auth.schemes.iter().any(|s| s.eq_ignore_ascii_case("bearer")) {
                        request = request.bearer_auth(credentials);
                    } else if auth.schemes.iter().any(|s| s.eq_ignore_ascii_case("basic")) {
                        request = request.header("Authorization", format!("Basic {credentials}"));
                    }
                }
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => return,
                Ok(response) if response.status().is_client_error() => {
                    tracing::warn!(
                        url = %config.url,
                        status = %response.status(),
                        "push target rejected delivery, dropping"
                    );
                    return;
                }
                Ok(response) => {
                    tracing::debug!(
                        url = %config.url,
                        status = %response.status(),
                        attempt,
                        "push delivery failed, will retry"
                    );
                }
                Err(e) => {
                    tracing::debug!(
                        url = %config.url,
                        error = %e,
                        attempt,
                        "push delivery error, will retry"
                    );
                }
            }

            if attempt + 1 < MAX_ATTEMPTS {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
        }

        tracing::warn!(url = %config.url, "push delivery abandoned after retries");
    }
}

/// Exponential backoff: base 1 s doubling per attempt, capped at 60 s.
fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE.saturating_mul(1u32 << attempt.min(16));
    exp.min(BACKOFF_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(5), Duration::from_secs(32));
        assert_eq!(backoff_delay(6), Duration::from_secs(60));
        assert_eq!(backoff_delay(20), Duration::from_secs(60));
    }
}

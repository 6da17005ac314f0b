use serde::Deserialize;
use serde_json::json;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
}

/// Per-token delivery result from one multicast attempt.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub token: String,
    pub delivered: bool,
    /// The provider reported the token as invalid/unregistered; it should
    /// be removed from the store rather than retried.
    pub permanent_failure: bool,
}

/// Multicast push delivery. Implementations report per-token outcomes;
/// transport-level failure is an `Err` the caller logs and swallows.
pub trait PushProvider: Send + Sync + 'static {
    fn send_multicast(
        &self,
        tokens: &[String],
        notification: &PushNotification,
    ) -> impl Future<Output = anyhow::Result<Vec<Delivery>>> + Send;
}

/// FCM-style HTTP provider: one multicast POST per notify, bearer-key
/// authorization, per-token results in the response body.
pub struct HttpPushProvider {
    client: reqwest::Client,
    endpoint: String,
    server_key: String,
}

#[derive(Debug, Deserialize)]
struct MulticastResponse {
    #[serde(default)]
    results: Vec<MulticastResult>,
}

#[derive(Debug, Deserialize)]
struct MulticastResult {
    #[serde(default)]
    error: Option<String>,
}

/// Provider error codes that mean the token is dead, not the request.
const PERMANENT_ERRORS: &[&str] = &["NotRegistered", "InvalidRegistration", "UNREGISTERED"];

impl HttpPushProvider {
    pub fn new(endpoint: String, server_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            server_key,
        }
    }
}

impl PushProvider for HttpPushProvider {
    async fn send_multicast(
        &self,
        tokens: &[String],
        notification: &PushNotification,
    ) -> anyhow::Result<Vec<Delivery>> {
        let payload = json!({
            "registration_ids": tokens,
            "notification": {
                "title": notification.title,
                "body": notification.body,
            },
            "data": { "type": "chat" },
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.server_key)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        let body: MulticastResponse = response.json().await?;
        debug!("Push multicast returned {} results", body.results.len());

        let deliveries = tokens
            .iter()
            .enumerate()
            .map(|(idx, token)| {
                let error = body.results.get(idx).and_then(|r| r.error.as_deref());
                Delivery {
                    token: token.clone(),
                    delivered: error.is_none(),
                    permanent_failure: error
                        .map(|e| PERMANENT_ERRORS.contains(&e))
                        .unwrap_or(false),
                }
            })
            .collect();
        Ok(deliveries)
    }
}

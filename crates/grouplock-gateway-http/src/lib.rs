// # HTTP Bridge Gateway
//
// This crate provides a RemoteGateway implementation that talks to a
// normalizing HTTP bridge in front of the actual group platform.
//
// The bridge exposes a small JSON API:
//
// - GET  `/entities/:id`                        → current name + member roster
// - POST `/entities/:id/name`                   → set display name
// - POST `/entities/:id/members/:member/nick`   → set one member's nickname
// - POST `/entities/:id/keepalive`              → presence signal
// - GET  `/events?cursor=N`                     → change events after cursor
//
// ## Constraints
//
// This adapter is isolated, stateless and single-shot:
//
// - Makes one HTTP request per engine operation
// - Full error propagation to the engine (scheduling, throttling and
//   cooldown are owned by GuardEngine)
// - HTTP timeout configured (30 seconds)
// - Specific handling for 401/403, 404, 429 (with Retry-After) and 5xx
// - NO retry logic (owned by GuardEngine)
// - NO caching (state owned by EntityRegistry)
//
// ## Security
//
// The bearer token NEVER appears in logs or Debug output.

use async_trait::async_trait;
use grouplock_core::config::GatewayConfig;
use grouplock_core::traits::{
    ChangeEvent, ChangeKind, EntityInfo, GatewayError, MemberInfo, RemoteGateway,
    RemoteGatewayFactory,
};
use grouplock_core::{EntityId, MemberId};
use serde::Deserialize;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;

/// Default HTTP timeout for bridge requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP bridge gateway
///
/// # Security
///
/// The Debug implementation intentionally does NOT expose the token.
impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGateway")
            .field("base_url", &self.base_url)
            .field("auth_token", &"<REDACTED>")
            .field("event_poll", &self.event_poll)
            .finish()
    }
}

pub struct HttpGateway {
    /// Base URL of the bridge
    base_url: String,

    /// Bearer token for the bridge
    /// ⚠️ NEVER log this value
    auth_token: String,

    /// Interval between event poll requests
    event_poll: Duration,

    /// HTTP client for bridge requests
    client: reqwest::Client,
}

/// Wire format for GET /entities/:id
#[derive(Debug, Deserialize)]
struct EntityDoc {
    name: String,
    #[serde(default)]
    members: Vec<MemberDoc>,
}

#[derive(Debug, Deserialize)]
struct MemberDoc {
    id: String,
    #[serde(default)]
    nickname: Option<String>,
}

/// Wire format for GET /events
#[derive(Debug, Deserialize)]
struct EventsDoc {
    cursor: u64,
    #[serde(default)]
    events: Vec<EventDoc>,
}

#[derive(Debug, Deserialize)]
struct EventDoc {
    entity: String,
    kind: WireKind,
    #[serde(default)]
    member: Option<String>,
    #[serde(default)]
    old_value: Option<String>,
    #[serde(default)]
    new_value: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum WireKind {
    NameChanged,
    NicknameChanged,
    MemberJoined,
    #[serde(other)]
    Unknown,
}

impl EventDoc {
    fn into_change_event(self) -> Option<ChangeEvent> {
        let kind = match self.kind {
            WireKind::NameChanged => ChangeKind::NameChanged,
            WireKind::NicknameChanged => ChangeKind::NicknameChanged,
            WireKind::MemberJoined => ChangeKind::MemberJoined,
            WireKind::Unknown => return None,
        };
        Some(ChangeEvent {
            entity: EntityId::new(self.entity),
            kind,
            member: self.member.map(MemberId::new),
            old_value: self.old_value,
            new_value: self.new_value,
        })
    }
}

/// Map a non-success bridge response to the gateway error taxonomy.
fn map_status(status: reqwest::StatusCode, retry_after: Option<Duration>) -> GatewayError {
    match status.as_u16() {
        401 | 403 => GatewayError::Forbidden,
        404 => GatewayError::NotFound,
        429 => GatewayError::RateLimited { retry_after },
        500..=599 => GatewayError::transient(format!("bridge server error: {}", status)),
        _ => GatewayError::transient(format!("unexpected bridge status: {}", status)),
    }
}

/// Parse a Retry-After header as a whole number of seconds.
fn retry_after_of(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

impl HttpGateway {
    /// Create a new bridge gateway
    ///
    /// # Security
    ///
    /// The token will NEVER be logged or displayed in error messages.
    pub fn new(
        base_url: impl Into<String>,
        auth_token: impl Into<String>,
        event_poll: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: auth_token.into(),
            event_poll,
            client,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let retry_after = retry_after_of(&response);
        Err(map_status(response.status(), retry_after))
    }

    async fn post_json(
        &self,
        url: String,
        payload: serde_json::Value,
    ) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.auth_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::transient(format!("HTTP request failed: {}", e)))?;

        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn fetch_info(&self, entity: &EntityId) -> Result<EntityInfo, GatewayError> {
        let url = format!("{}/entities/{}", self.base_url, entity);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .map_err(|e| GatewayError::transient(format!("HTTP request failed: {}", e)))?;
        let response = Self::check(response).await?;

        let doc: EntityDoc = response
            .json()
            .await
            .map_err(|e| GatewayError::malformed(format!("invalid entity document: {}", e)))?;

        Ok(EntityInfo {
            display_name: doc.name,
            members: doc
                .members
                .into_iter()
                .map(|m| MemberInfo {
                    id: MemberId::new(m.id),
                    nickname: m.nickname,
                })
                .collect(),
        })
    }

    async fn rename_entity(&self, entity: &EntityId, name: &str) -> Result<(), GatewayError> {
        tracing::debug!(entity = %entity, "setting display name via bridge");
        let url = format!("{}/entities/{}/name", self.base_url, entity);
        self.post_json(url, serde_json::json!({ "name": name })).await
    }

    async fn set_member_nickname(
        &self,
        entity: &EntityId,
        member: &MemberId,
        nickname: &str,
    ) -> Result<(), GatewayError> {
        tracing::debug!(entity = %entity, member = %member, "setting nickname via bridge");
        let url = format!("{}/entities/{}/members/{}/nick", self.base_url, entity, member);
        self.post_json(url, serde_json::json!({ "nickname": nickname }))
            .await
    }

    async fn keepalive(&self, entity: &EntityId) -> Result<(), GatewayError> {
        let url = format!("{}/entities/{}/keepalive", self.base_url, entity);
        self.post_json(url, serde_json::json!({})).await
    }

    fn subscribe(&self) -> Pin<Box<dyn Stream<Item = ChangeEvent> + Send + 'static>> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        let base_url = self.base_url.clone();
        let auth_token = self.auth_token.clone();
        let poll_interval = self.event_poll;
        let client = self.client.clone();

        tokio::spawn(async move {
            tracing::info!(
                "starting bridge event polling (base={}, interval={:?})",
                base_url,
                poll_interval
            );

            let mut cursor: u64 = 0;

            loop {
                let url = format!("{}/events?cursor={}", base_url, cursor);
                match client.get(&url).bearer_auth(&auth_token).send().await {
                    Ok(response) if response.status().is_success() => {
                        match response.json::<EventsDoc>().await {
                            Ok(doc) => {
                                cursor = doc.cursor;
                                for event in doc.events {
                                    let Some(event) = event.into_change_event() else {
                                        tracing::debug!("skipping unknown event kind");
                                        continue;
                                    };
                                    if tx.send(event).is_err() {
                                        tracing::info!("receiver dropped, stopping event poll");
                                        return;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::warn!("failed to parse events response: {}", e);
                            }
                        }
                    }
                    Ok(response) => {
                        tracing::warn!("events poll HTTP error: {}", response.status());
                    }
                    Err(e) => {
                        tracing::warn!("events poll request failed: {}", e);
                    }
                }

                tokio::time::sleep(poll_interval).await;
            }
        });

        Box::pin(UnboundedReceiverStream::new(rx))
    }

    fn gateway_name(&self) -> &'static str {
        "http"
    }
}

/// Factory for creating bridge gateways
pub struct HttpGatewayFactory;

impl RemoteGatewayFactory for HttpGatewayFactory {
    fn create(
        &self,
        config: &GatewayConfig,
    ) -> grouplock_core::Result<Arc<dyn RemoteGateway>> {
        match config {
            GatewayConfig::Http {
                base_url,
                auth_token,
                event_poll_secs,
            } => {
                if auth_token.is_empty() {
                    return Err(grouplock_core::Error::config("bridge auth token is required"));
                }

                Ok(Arc::new(HttpGateway::new(
                    base_url.clone(),
                    auth_token.clone(),
                    Duration::from_secs(*event_poll_secs),
                )))
            }
            _ => Err(grouplock_core::Error::config(
                "Invalid config for HTTP gateway",
            )),
        }
    }
}

/// Register the HTTP gateway with a registry
///
/// This function should be called during initialization to make the
/// bridge gateway available.
pub fn register(registry: &grouplock_core::AdapterRegistry) {
    registry.register_gateway("http", Box::new(HttpGatewayFactory));
}

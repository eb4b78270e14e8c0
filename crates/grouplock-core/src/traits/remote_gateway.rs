// # Remote Gateway Trait
//
// Defines the interface to the remote platform that hosts the watched
// groups. This is the only shape the engine depends on: adapter crates are
// responsible for normalizing whatever the real platform returns into
// these types.
//
// ## Implementations
//
// - HTTP bridge: `grouplock-gateway-http` crate
// - Test doubles: `tests/common/mod.rs`
//
// ## Trust boundary
//
// Gateways are isolated, stateless, single-shot adapters. They must not
// retry, back off, cache desired state, or spawn long-lived work beyond
// the `subscribe` event feed. Retry pacing, rate-limit backoff and
// scheduling are owned by the engine.

use async_trait::async_trait;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio_stream::Stream;

use crate::types::{EntityId, MemberId};

/// Failure taxonomy for remote calls.
///
/// The engine reacts to each kind differently: `Transient` and `Malformed`
/// drift is simply re-detected on a later cycle, `RateLimited` pauses the
/// global throttle, and the permanent kinds eventually remove the entity
/// from the watch set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The entity does not exist (or no longer exists) on the platform
    #[error("entity not found")]
    NotFound,

    /// The agent's session is not allowed to touch the entity
    #[error("access forbidden")]
    Forbidden,

    /// The platform is rejecting mutations due to rate limiting
    #[error("rate limited by remote platform")]
    RateLimited {
        /// Backoff hint from the platform, if it provided one
        retry_after: Option<Duration>,
    },

    /// Network failure, timeout, or other recoverable condition
    #[error("transient gateway failure: {0}")]
    Transient(String),

    /// The platform answered with an unexpected response shape
    #[error("malformed remote response: {0}")]
    Malformed(String),
}

impl GatewayError {
    /// Create a transient error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Create a malformed-response error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Whether this failure means the entity is permanently inaccessible
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::NotFound | Self::Forbidden)
    }
}

/// Result of fetching an entity's current remote state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityInfo {
    /// The group's current display name
    pub display_name: String,
    /// Current participants with their observed nicknames
    pub members: Vec<MemberInfo>,
}

/// One participant inside an [`EntityInfo`] snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub id: MemberId,
    /// `None` when the member has no nickname set in this group
    pub nickname: Option<String>,
}

/// Kind of asynchronous change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The group's display name changed
    NameChanged,
    /// A member's nickname changed
    NicknameChanged,
    /// A member joined the group
    MemberJoined,
}

/// An asynchronous change notification from the platform.
///
/// Delivery order per entity is not guaranteed to match remote action
/// order; values are best-effort hints and the engine re-reads desired
/// state at execution time anyway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub entity: EntityId,
    pub kind: ChangeKind,
    /// The affected member, for nickname/membership events
    pub member: Option<MemberId>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

impl ChangeEvent {
    /// Create a name-change notification
    pub fn name_changed(entity: EntityId, old: Option<String>, new: impl Into<String>) -> Self {
        Self {
            entity,
            kind: ChangeKind::NameChanged,
            member: None,
            old_value: old,
            new_value: Some(new.into()),
        }
    }

    /// Create a nickname-change notification
    pub fn nickname_changed(
        entity: EntityId,
        member: MemberId,
        new: Option<String>,
    ) -> Self {
        Self {
            entity,
            kind: ChangeKind::NicknameChanged,
            member: Some(member),
            old_value: None,
            new_value: new,
        }
    }

    /// Create a member-joined notification
    pub fn member_joined(entity: EntityId, member: MemberId) -> Self {
        Self {
            entity,
            kind: ChangeKind::MemberJoined,
            member: Some(member),
            old_value: None,
            new_value: None,
        }
    }
}

/// Trait for remote platform adapters.
///
/// # Thread Safety
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Single-shot semantics
///
/// Each call maps to one remote operation. Implementations return an error
/// rather than retrying; the engine owns pacing, debouncing, and backoff.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Fetch the current display name and member list of an entity.
    async fn fetch_info(&self, entity: &EntityId) -> Result<EntityInfo, GatewayError>;

    /// Set the entity's display name.
    async fn rename_entity(&self, entity: &EntityId, name: &str) -> Result<(), GatewayError>;

    /// Set one member's nickname inside the entity.
    async fn set_member_nickname(
        &self,
        entity: &EntityId,
        member: &MemberId,
        nickname: &str,
    ) -> Result<(), GatewayError>;

    /// Send a lightweight presence signal for the entity.
    ///
    /// Used by the engine's anti-idle timer to keep the platform session
    /// from being reaped. Failures are logged, never fatal.
    async fn keepalive(&self, entity: &EntityId) -> Result<(), GatewayError>;

    /// Subscribe to asynchronous change notifications.
    ///
    /// Called at most once per engine run. The stream ends only when the
    /// gateway itself shuts down.
    fn subscribe(&self) -> Pin<Box<dyn Stream<Item = ChangeEvent> + Send + 'static>>;

    /// Short adapter name for logging/debugging.
    fn gateway_name(&self) -> &'static str;
}

/// Helper trait for constructing gateways from configuration
pub trait RemoteGatewayFactory: Send + Sync {
    /// Create a RemoteGateway instance from configuration
    fn create(
        &self,
        config: &crate::config::GatewayConfig,
    ) -> Result<std::sync::Arc<dyn RemoteGateway>, crate::Error>;
}

//! Core traits for the grouplock system
//!
//! This module defines the abstract interfaces at the engine's boundary.
//!
//! - [`RemoteGateway`]: fetch and mutate group attributes on the remote platform
//! - [`LockStore`]: durable persistence of the desired-state map

pub mod lock_store;
pub mod remote_gateway;

pub use lock_store::{LockStore, LockStoreFactory};
pub use remote_gateway::{
    ChangeEvent, ChangeKind, EntityInfo, GatewayError, MemberInfo, RemoteGateway,
    RemoteGatewayFactory,
};

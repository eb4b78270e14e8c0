// # grouplock-core
//
// Core library for the event-driven group attribute guard.
//
// ## Architecture Overview
//
// This library provides the core functionality for enforcing desired
// group attributes against an untrusted remote platform:
// - **RemoteGateway**: Trait for observing and mutating remote entities
// - **LockStore**: Trait for persistent lock-record management
// - **EntityRegistry**: In-memory watch set, persisted through the store
// - **GuardEngine**: Core engine that orchestrates drift detection →
//   gated queueing → throttled correction
// - **AdapterRegistry**: Plugin-based registry for gateways and stores
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from adapters
// 2. **Event-Driven**: Uses async streams for change monitoring,
//    backed by periodic sweeps
// 3. **Plugin-Based**: Gateways and stores register dynamically,
//    no hard-coded if-else
// 4. **Library-First**: All core functionality usable as a library
// 5. **Bounded Aggression**: Per-entity serialization, a global
//    mutation throttle and a cooldown circuit-breaker keep correction
//    traffic inside platform tolerances

pub mod config;
pub mod engine;
pub mod error;
pub mod plugins;
pub mod registry;
pub mod state;
pub mod traits;
pub mod types;

// Re-export core types for convenience
pub use config::{EngineConfig, GatewayConfig, GuardConfig, StoreConfig};
pub use engine::{Command, CommandHandle, EngineEvent, GuardEngine, NicknamePolicy};
pub use error::{Error, Result};
pub use plugins::AdapterRegistry;
pub use registry::{EntityRegistry, LockRecord};
pub use state::{FileLockStore, MemoryLockStore};
pub use traits::{LockStore, RemoteGateway};
pub use types::{AttributeKind, EntityId, MemberId};

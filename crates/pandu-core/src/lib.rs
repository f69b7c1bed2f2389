//! Per-client state for conversational proxies.
//!
//! Two independent stores share one sharded map implementation:
//! [`ConversationMemory`] keeps a bounded rolling history per client and
//! [`RateGuard`] throttles and temporarily blocks clients that send too many
//! requests. Both expire idle entries lazily on write and, optionally, from a
//! background [`Sweeper`]. [`ChatGate`] composes them into the request path.

pub mod clock;
pub mod diagnostics;
pub mod error;
pub mod gate;
pub mod guard;
pub mod key;
pub mod memory;
pub mod store;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use diagnostics::Diagnostics;
pub use error::PanduCoreError;
pub use gate::{ChatGate, EchoResponder, GateOutcome, PromptRequest, Responder};
pub use guard::{Decision, GuardStats, RateAlgorithm, RateGuard, RateGuardSettings, RateState};
pub use key::{AddressAgentDeriver, ClientAttributes, IdentityKey, KeyDeriver};
pub use memory::{
    ConversationMemory, ConversationState, MemorySettings, MemoryStats, Role, Turn,
};
pub use store::{DEFAULT_SHARDS, ExpiringStateStore, StoreStats};
pub use sweeper::Sweeper;

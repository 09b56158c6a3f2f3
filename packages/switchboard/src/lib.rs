//! # Switchboard
//!
//! An in-process broker where hubs admit spokes, emitters fan out typed
//! events, and input bridges decide on submitted messages.
//!
//! ## Core Concepts
//!
//! Switchboard separates **who may talk** from **what is said**:
//! - [`connect`] / [`disconnect`] = the handshake (who is attached to whom)
//! - [`Emitter`] + [`View`] = one-to-many broadcast of typed events
//! - [`InputBridge`] + [`Submitter`] = many-to-one messages with
//!   accept/reject/defer decisions and free-form replies
//!
//! ## Architecture
//!
//! ```text
//! Spoke (View / Submitter)                        Hub (Emitter / InputBridge)
//!     │                                               │
//!     │ connect(hub, spoke, ctx) ───────────────────► │ is_connection_allowed(ctx)
//!     │                                               │ enact_connection(ctx)
//!     │ ◄──────────────── on_connection_outcome(true) │
//!     │        (View: register_listener per kind)     │
//!     │                                               │
//!     │ ◄──────── handle_event ─────── propagate_event / propagate_generic_event
//!     │                                               │
//!     │ send_input(msg) ────────────────────────────► │ handle_input(msg)
//!     │ ◄──── on_accepted / on_rejected ───────────── │   Accepted / Rejected
//!     │                                               │   Deferred ─► PendingRequests
//!     │ ◄──── on_accepted / on_rejected ───── complete_accepted / complete_rejected
//!     │ ◄──── on_reply ──────────────────────── send_reply
//!     │                                               │
//!     │ disconnect(hub, spoke) ─────────────────────► │ enact_disconnection
//! ```
//!
//! ## Key Invariants
//!
//! 1. **At most one hub** - A spoke is attached to at most one hub per role
//! 2. **Both sides agree** - Hub registry and spoke [`Attachment`] change together
//! 3. **Rollback on refusal** - A spoke declining an admitted connection undoes the admission
//! 4. **Exact fan-out** - Only listeners of a matching kind that pass the filter see an event
//! 5. **One terminal completion** - A deferred message is completed exactly once
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use switchboard::{
//!     connect, Attachment, BrokerError, Capabilities, Emits, Emitter, EventKind, Hub,
//!     HubId, HubIdentity, KindSet, Listener, ListenerRegistry, Registration, Roster, View,
//! };
//!
//! // 1. Define an event kind
//! #[derive(Debug, Clone)]
//! struct Headline(String);
//! impl EventKind for Headline {
//!     type InitData = Vec<Headline>;
//! }
//!
//! // 2. Define the hub
//! struct Model {
//!     id: HubId,
//!     roster: Roster,
//!     listeners: ListenerRegistry,
//!     archive: Vec<Headline>,
//! }
//!
//! impl HubIdentity for Model {
//!     fn hub_id(&self) -> HubId {
//!         self.id
//!     }
//! }
//!
//! impl Hub<dyn View<()>> for Model {
//!     type Context = ();
//!     // admission policy and bookkeeping, usually backed by `Roster`
//! }
//!
//! impl Emits<Headline> for Model {
//!     fn listeners(&self) -> &[Registration<Headline>] {
//!         self.listeners.listeners::<Headline>()
//!     }
//!     fn on_registered(&mut self, r: Registration<Headline>) -> Result<(), BrokerError> {
//!         self.listeners.register(r)
//!     }
//!     fn init_data(&self, _: &Registration<Headline>) -> Vec<Headline> {
//!         self.archive.clone()
//!     }
//! }
//!
//! impl Emitter for Model {
//!     fn event_kinds() -> KindSet<Self> {
//!         KindSet::new().with::<Headline>()
//!     }
//! }
//!
//! // 3. Connect a view and broadcast
//! let view: Arc<dyn View<()>> = Arc::new(Ticker::new());
//! connect(&mut model, &view, ())?;
//! model.propagate_event(&Headline("markets up".into()));
//! ```
//!
//! ## Threading
//!
//! Every operation runs to completion on the caller's thread. A hub shared
//! across threads is wrapped in one lock by its owner; spokes are `Send +
//! Sync` and keep their own state behind interior mutability.
//!
//! ## What This Is Not
//!
//! Switchboard is **not**:
//! - A transport or wire protocol
//! - A persistent queue
//! - An async runtime

// Core modules
mod connection;
mod core;
mod error;
mod fanout;
mod registry;
mod request;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;



// Re-export identifiers
pub use crate::core::{HubId, RequestId, SpokeId};

// Re-export error types
pub use crate::error::BrokerError;

// Re-export connection protocol
pub use connection::{
    connect, disconnect, Attachment, ConnectionState, Hub, HubIdentity, Roster, Session, Spoke,
};

// Re-export fan-out types
pub use fanout::{
    narrow, Capabilities, Emits, Emitter, EventKind, EventView, KindEntry, KindSet, Listener,
    ListenerHandle, Registration, View,
};

// Re-export listener bookkeeping
pub use registry::ListenerRegistry;

// Re-export request/reply types
pub use request::{
    Completion, InputBridge, InputStatus, PendingRequest, PendingRequests, Submitter,
    SubmitterHandle, Verdict,
};

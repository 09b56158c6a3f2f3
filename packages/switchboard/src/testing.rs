//! Recording spokes for tests.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! switchboard = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use switchboard::testing::RecordingListener;
//!
//! let spy = Arc::new(RecordingListener::<Headline>::new());
//! let view: Arc<dyn View<Token>> = spy.clone();
//! connect(&mut model, &view, token)?;
//!
//! model.propagate_event(&Headline("markets up".into()));
//!
//! assert_eq!(spy.events(), vec![Headline("markets up".into())]);
//! assert_eq!(spy.init_count(), 1);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::connection::Attachment;
use crate::core::{HubId, SpokeId};
use crate::fanout::{Capabilities, EventKind, Listener, View};
use crate::request::Submitter;

/// One connection or disconnection outcome seen by a spy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    /// The hub that reported it.
    pub hub: HubId,
    /// Whether the attempt was accepted.
    pub accepted: bool,
}

/// A view listening to one kind, recording everything it is told.
///
/// Implements [`View<C>`] for every context type, so the same spy can be
/// connected to any emitter that declares `E`.
pub struct RecordingListener<E> {
    attachment: Attachment,
    events: Mutex<Vec<E>>,
    inits: AtomicUsize,
    connections: Mutex<Vec<Outcome>>,
    disconnections: Mutex<Vec<Outcome>>,
    declines: bool,
}

impl<E: EventKind + Clone> RecordingListener<E> {
    /// A spy that confirms every accepted connection.
    pub fn new() -> Self {
        Self {
            attachment: Attachment::new(),
            events: Mutex::new(Vec::new()),
            inits: AtomicUsize::new(0),
            connections: Mutex::new(Vec::new()),
            disconnections: Mutex::new(Vec::new()),
            declines: false,
        }
    }

    /// A spy that refuses every connection, forcing a rollback.
    pub fn declining() -> Self {
        Self {
            declines: true,
            ..Self::new()
        }
    }

    /// Connection record.
    pub fn attachment(&self) -> &Attachment {
        &self.attachment
    }

    /// Spoke id.
    pub fn spoke_id(&self) -> SpokeId {
        self.attachment.spoke_id()
    }

    /// Events received, in delivery order.
    pub fn events(&self) -> Vec<E> {
        self.events.lock().unwrap().clone()
    }

    /// Number of events received.
    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// Number of initialization payloads received.
    pub fn init_count(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    /// Connection outcomes, in order.
    pub fn connections(&self) -> Vec<Outcome> {
        self.connections.lock().unwrap().clone()
    }

    /// Disconnection outcomes, in order.
    pub fn disconnections(&self) -> Vec<Outcome> {
        self.disconnections.lock().unwrap().clone()
    }

    /// Forget recorded events.
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl<E: EventKind + Clone> Default for RecordingListener<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: EventKind + Clone> Listener<E> for RecordingListener<E> {
    fn handle_event(&self, event: &E) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn initialize(&self, _data: E::InitData) {
        self.inits.fetch_add(1, Ordering::SeqCst);
    }
}

impl<C: 'static, E: EventKind + Clone> View<C> for RecordingListener<E> {
    fn attachment(&self) -> &Attachment {
        &self.attachment
    }

    fn declare_listeners(self: Arc<Self>, capabilities: &mut Capabilities) {
        capabilities.listen::<E>(self);
    }

    fn on_connection_outcome(&self, hub: HubId, _context: &C, accepted: bool) -> bool {
        self.connections.lock().unwrap().push(Outcome { hub, accepted });
        accepted && !self.declines
    }

    fn on_disconnection_outcome(&self, hub: HubId, accepted: bool) {
        self.disconnections.lock().unwrap().push(Outcome { hub, accepted });
    }
}

/// Terminal decision seen by a [`RecordingSubmitter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// `on_accepted` fired.
    Accepted,
    /// `on_rejected` fired.
    Rejected,
}

/// A submitter recording decisions and replies.
///
/// Implements [`Submitter<C>`] for every context type with `Reply = R`.
pub struct RecordingSubmitter<R> {
    attachment: Attachment,
    decisions: Mutex<Vec<Decision>>,
    replies: Mutex<Vec<R>>,
    connections: Mutex<Vec<Outcome>>,
}

impl<R: Clone + Send> RecordingSubmitter<R> {
    /// Create a spy.
    pub fn new() -> Self {
        Self {
            attachment: Attachment::new(),
            decisions: Mutex::new(Vec::new()),
            replies: Mutex::new(Vec::new()),
            connections: Mutex::new(Vec::new()),
        }
    }

    /// Connection record.
    pub fn attachment(&self) -> &Attachment {
        &self.attachment
    }

    /// Spoke id.
    pub fn spoke_id(&self) -> SpokeId {
        self.attachment.spoke_id()
    }

    /// Decisions received, in order.
    pub fn decisions(&self) -> Vec<Decision> {
        self.decisions.lock().unwrap().clone()
    }

    /// Number of acceptances.
    pub fn accepted(&self) -> usize {
        self.count(Decision::Accepted)
    }

    /// Number of rejections.
    pub fn rejected(&self) -> usize {
        self.count(Decision::Rejected)
    }

    /// Replies received, in order.
    pub fn replies(&self) -> Vec<R> {
        self.replies.lock().unwrap().clone()
    }

    /// Connection outcomes, in order.
    pub fn connections(&self) -> Vec<Outcome> {
        self.connections.lock().unwrap().clone()
    }

    fn count(&self, decision: Decision) -> usize {
        self.decisions
            .lock()
            .unwrap()
            .iter()
            .filter(|d| **d == decision)
            .count()
    }
}

impl<R: Clone + Send> Default for RecordingSubmitter<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: 'static, R: Clone + Send> Submitter<C> for RecordingSubmitter<R> {
    type Reply = R;

    fn attachment(&self) -> &Attachment {
        &self.attachment
    }

    fn on_accepted(&self) {
        self.decisions.lock().unwrap().push(Decision::Accepted);
    }

    fn on_rejected(&self) {
        self.decisions.lock().unwrap().push(Decision::Rejected);
    }

    fn on_reply(&self, reply: R) {
        self.replies.lock().unwrap().push(reply);
    }

    fn on_connection_outcome(&self, hub: HubId, _context: &C, accepted: bool) -> bool {
        self.connections.lock().unwrap().push(Outcome { hub, accepted });
        accepted
    }
}

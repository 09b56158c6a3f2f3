//! Request/reply: submitters send input, bridges decide.
//!
//! # Lifecycle of one message
//!
//! ```text
//! Submitted ──► Rejected                         (on_rejected fires now)
//!           ──► Accepted                         (on_accepted fires now)
//!           ──► Deferred ──► Accepted            (complete_accepted, later)
//!                        ──► Rejected            (complete_rejected, later)
//! ```
//!
//! A deferred message obliges the bridge to call exactly one of
//! [`InputBridge::complete_accepted`] / [`InputBridge::complete_rejected`]
//! later. The bridge's [`PendingRequests`] table remembers who is waiting.
//!
//! Replies are a separate channel: [`InputBridge::send_reply`] may be used
//! before, during or after the decision.
//!
//! # Completion after disconnect
//!
//! If the submitter disconnected (or reconnected, starting a new session)
//! between deferral and completion, the pending request is stale. Completion
//! by spoke serves the spoke's oldest live request first; a stale request is
//! only consumed when the spoke has no live one, and then nothing fires and
//! the call reports [`Completion::Detached`]. Bridges that drop a spoke's
//! bookkeeping on disconnect call [`PendingRequests::forget`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::connection::{Attachment, Hub, HubIdentity, Session, Spoke};
use crate::core::{HubId, RequestId, SpokeId};
use crate::error::BrokerError;

/// Decision on a submitted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputStatus {
    /// Refused. The submitter's rejection hook has fired.
    Rejected,
    /// Postponed. Exactly one completion will follow.
    Deferred,
    /// Taken. The submitter's acceptance hook has fired.
    Accepted,
}

impl InputStatus {
    /// Returns true for `Accepted` and `Rejected`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InputStatus::Deferred)
    }

    /// Returns true if the message was accepted.
    pub fn is_accepted(&self) -> bool {
        matches!(self, InputStatus::Accepted)
    }

    /// Returns true if the message was rejected.
    pub fn is_rejected(&self) -> bool {
        matches!(self, InputStatus::Rejected)
    }
}

impl fmt::Display for InputStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputStatus::Rejected => write!(f, "rejected"),
            InputStatus::Deferred => write!(f, "deferred"),
            InputStatus::Accepted => write!(f, "accepted"),
        }
    }
}

/// Terminal decision on a deferred message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// Fires the submitter's acceptance hook.
    Accepted,
    /// Fires the submitter's rejection hook.
    Rejected,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Accepted => write!(f, "accepted"),
            Verdict::Rejected => write!(f, "rejected"),
        }
    }
}

impl From<Verdict> for InputStatus {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Accepted => InputStatus::Accepted,
            Verdict::Rejected => InputStatus::Rejected,
        }
    }
}

/// What a completion call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The submitter's terminal hook fired.
    Delivered,
    /// The submitter left the session it submitted in; nothing fired.
    Detached,
}

// =============================================================================
// Submitter (spoke side)
// =============================================================================

/// A spoke that submits messages to an input bridge.
///
/// Hubs admit submitters as `dyn Submitter<C, Reply = R>`.
pub trait Submitter<C>: Send + Sync {
    /// Payload carried by [`InputBridge::send_reply`].
    type Reply;

    /// Connection record for this role.
    fn attachment(&self) -> &Attachment;

    /// The message was accepted, immediately or after deferral.
    fn on_accepted(&self);

    /// The message was rejected, immediately or after deferral.
    fn on_rejected(&self);

    /// A reply from the bridge.
    fn on_reply(&self, reply: Self::Reply);

    /// Connection outcome. Returning false from an accepted attempt refuses
    /// the connection.
    fn on_connection_outcome(&self, _hub: HubId, _context: &C, accepted: bool) -> bool {
        accepted
    }

    /// Disconnection outcome.
    fn on_disconnection_outcome(&self, _hub: HubId, _accepted: bool) {}
}

/// Shared handle to a submitter.
pub type SubmitterHandle<C, R> = Arc<dyn Submitter<C, Reply = R>>;

impl<H, C, R> Spoke<H, C> for dyn Submitter<C, Reply = R>
where
    H: HubIdentity,
    C: 'static,
    R: 'static,
{
    fn attachment(&self) -> &Attachment {
        Submitter::attachment(self)
    }

    fn on_connection_outcome(self: Arc<Self>, hub: &mut H, context: &C, accepted: bool) -> bool {
        Submitter::on_connection_outcome(&*self, hub.hub_id(), context, accepted)
    }

    fn on_disconnection_outcome(&self, hub: &H, accepted: bool) {
        Submitter::on_disconnection_outcome(self, hub.hub_id(), accepted);
    }
}

// =============================================================================
// Pending requests (hub-side bookkeeping)
// =============================================================================

/// A deferred message awaiting completion.
pub struct PendingRequest<C, R> {
    id: RequestId,
    spoke: SpokeId,
    session: Option<Session>,
    submitter: SubmitterHandle<C, R>,
    submitted_at: DateTime<Utc>,
}

impl<C: 'static, R: 'static> PendingRequest<C, R> {
    /// Request id.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// The waiting spoke.
    pub fn spoke_id(&self) -> SpokeId {
        self.spoke
    }

    /// When the message was deferred.
    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    /// The waiting submitter.
    pub fn submitter(&self) -> &SubmitterHandle<C, R> {
        &self.submitter
    }

    /// Returns true if the submitter is still in the session it submitted in.
    pub fn is_live(&self) -> bool {
        self.session.is_some() && Submitter::attachment(&*self.submitter).session() == self.session
    }
}

impl<C, R> fmt::Debug for PendingRequest<C, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("id", &self.id)
            .field("spoke", &self.spoke)
            .field("submitted_at", &self.submitted_at)
            .finish_non_exhaustive()
    }
}

/// Deferred messages of an input bridge, oldest first.
pub struct PendingRequests<C, R> {
    queue: VecDeque<PendingRequest<C, R>>,
}

impl<C: 'static, R: 'static> PendingRequests<C, R> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// Record a deferred message from `submitter`.
    pub fn defer(&mut self, submitter: &SubmitterHandle<C, R>) -> RequestId {
        let attachment = Submitter::attachment(&**submitter);
        let id = RequestId::new();
        self.queue.push_back(PendingRequest {
            id,
            spoke: attachment.spoke_id(),
            session: attachment.session(),
            submitter: Arc::clone(submitter),
            submitted_at: Utc::now(),
        });
        id
    }

    /// Remove and return the next request of a spoke to complete.
    ///
    /// That is the oldest live request, or the oldest stale one when the
    /// spoke has nothing live.
    pub fn take_next(&mut self, spoke: SpokeId) -> Option<PendingRequest<C, R>> {
        let index = self
            .queue
            .iter()
            .position(|r| r.spoke == spoke && r.is_live())
            .or_else(|| self.queue.iter().position(|r| r.spoke == spoke))?;
        self.queue.remove(index)
    }

    /// Drop every pending request of a spoke. Returns how many were dropped.
    ///
    /// Call from `enact_disconnection` when the bridge discards the work a
    /// departing submitter was waiting on.
    pub fn forget(&mut self, spoke: SpokeId) -> usize {
        let before = self.queue.len();
        self.queue.retain(|r| r.spoke != spoke);
        before - self.queue.len()
    }

    /// Drop every stale request. Returns how many were dropped.
    pub fn prune(&mut self) -> usize {
        let before = self.queue.len();
        self.queue.retain(PendingRequest::is_live);
        before - self.queue.len()
    }

    /// Remove and return a pending request by id.
    pub fn take(&mut self, id: RequestId) -> Option<PendingRequest<C, R>> {
        let index = self.queue.iter().position(|r| r.id == id)?;
        self.queue.remove(index)
    }

    /// Number of pending requests of a spoke.
    pub fn count_for(&self, spoke: SpokeId) -> usize {
        self.queue.iter().filter(|r| r.spoke == spoke).count()
    }

    /// Pending requests, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &PendingRequest<C, R>> {
        self.queue.iter()
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<C: 'static, R: 'static> Default for PendingRequests<C, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C, R> fmt::Debug for PendingRequests<C, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.queue.iter()).finish()
    }
}

// =============================================================================
// Input bridge (hub side)
// =============================================================================

/// A hub that decides on messages from attached submitters.
///
/// # Example
///
/// ```ignore
/// impl InputBridge<Token, Receipt> for Model {
///     type Message = Order;
///
///     fn handle_input(&mut self, from: &SubmitterHandle<Token, Receipt>, order: Order) -> InputStatus {
///         if order.quantity == 0 {
///             return InputStatus::Rejected;
///         }
///         self.validation_queue.push(order);
///         InputStatus::Deferred
///     }
///
///     fn pending_mut(&mut self) -> &mut PendingRequests<Token, Receipt> {
///         &mut self.pending
///     }
/// }
///
/// // Later, once validation finishes:
/// model.complete_accepted(spoke_id)?;
/// ```
pub trait InputBridge<C: 'static, R: 'static>:
    Hub<dyn Submitter<C, Reply = R>, Context = C>
{
    /// Messages this bridge accepts.
    type Message;

    /// Decide on a message from an attached submitter.
    ///
    /// Returning [`InputStatus::Deferred`] records the request in
    /// [`pending_mut`](InputBridge::pending_mut).
    fn handle_input(
        &mut self,
        submitter: &SubmitterHandle<C, R>,
        message: Self::Message,
    ) -> InputStatus;

    /// Deferred-request bookkeeping.
    fn pending_mut(&mut self) -> &mut PendingRequests<C, R>;

    /// Submit a message on behalf of `submitter`.
    ///
    /// A submitter not attached to this bridge is rejected without
    /// consulting [`handle_input`](InputBridge::handle_input).
    fn send_input(&mut self, submitter: &SubmitterHandle<C, R>, message: Self::Message) -> InputStatus {
        let hub = self.hub_id();
        let spoke = Submitter::attachment(&**submitter).spoke_id();

        if !Submitter::attachment(&**submitter).is_attached_to(hub) {
            debug!(%hub, %spoke, "input rejected: submitter not attached");
            submitter.on_rejected();
            return InputStatus::Rejected;
        }

        let status = self.handle_input(submitter, message);
        match status {
            InputStatus::Rejected => submitter.on_rejected(),
            InputStatus::Accepted => submitter.on_accepted(),
            InputStatus::Deferred => {
                let request = self.pending_mut().defer(submitter);
                debug!(%hub, %spoke, %request, "input deferred");
            }
        }
        status
    }

    /// Accept the next deferred message of `spoke`.
    ///
    /// Live requests are served oldest first; see
    /// [`PendingRequests::take_next`].
    ///
    /// # Errors
    ///
    /// [`BrokerError::NoPendingRequest`] if `spoke` has nothing deferred.
    fn complete_accepted(&mut self, spoke: SpokeId) -> Result<Completion, BrokerError> {
        complete_next(self, spoke, Verdict::Accepted)
    }

    /// Reject the next deferred message of `spoke`.
    ///
    /// # Errors
    ///
    /// [`BrokerError::NoPendingRequest`] if `spoke` has nothing deferred.
    fn complete_rejected(&mut self, spoke: SpokeId) -> Result<Completion, BrokerError> {
        complete_next(self, spoke, Verdict::Rejected)
    }

    /// Complete one deferred message by id.
    ///
    /// # Errors
    ///
    /// [`BrokerError::UnknownRequest`] if the bridge does not hold `request`.
    fn complete_request(&mut self, request: RequestId, verdict: Verdict) -> Result<Completion, BrokerError> {
        let hub = self.hub_id();
        let Some(pending) = self.pending_mut().take(request) else {
            warn!(%hub, %request, %verdict, "completion of an unknown request");
            return Err(BrokerError::UnknownRequest { hub, request });
        };
        Ok(resolve(hub, pending, verdict))
    }

    /// Deliver a reply, independently of any accept/reject decision.
    fn send_reply(&self, submitter: &SubmitterHandle<C, R>, reply: R) {
        submitter.on_reply(reply);
    }
}

fn complete_next<B, C, R>(bridge: &mut B, spoke: SpokeId, verdict: Verdict) -> Result<Completion, BrokerError>
where
    B: InputBridge<C, R> + ?Sized,
    C: 'static,
    R: 'static,
{
    let hub = bridge.hub_id();
    let Some(request) = bridge.pending_mut().take_next(spoke) else {
        warn!(%hub, %spoke, %verdict, "completion without a deferred request");
        return Err(BrokerError::NoPendingRequest { hub, spoke });
    };
    Ok(resolve(hub, request, verdict))
}

fn resolve<C: 'static, R: 'static>(hub: HubId, request: PendingRequest<C, R>, verdict: Verdict) -> Completion {
    let spoke = request.spoke_id();
    if !request.is_live() {
        debug!(%hub, %spoke, request = %request.id(), "submitter left its session, completion dropped");
        return Completion::Detached;
    }

    match verdict {
        Verdict::Accepted => request.submitter().on_accepted(),
        Verdict::Rejected => request.submitter().on_rejected(),
    }
    debug!(%hub, %spoke, request = %request.id(), %verdict, "deferred input completed");
    Completion::Delivered
}

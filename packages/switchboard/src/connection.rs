//! The connection handshake shared by every hub/spoke pair.
//!
//! # Protocol
//!
//! ```text
//! connect(hub, spoke, ctx)
//!     │
//!     ├─ spoke attached anywhere? ──────────────► spoke.on_connection_outcome(false)
//!     ├─ hub.is_connection_allowed(ctx) == false ► spoke.on_connection_outcome(false)
//!     │
//!     ├─ hub.enact_connection(ctx)          (tentative admission)
//!     ├─ spoke attachment := hub
//!     └─ spoke.on_connection_outcome(true)
//!            ├─ true  ─► connected
//!            └─ false ─► attachment cleared, hub.enact_disconnection()  (rollback)
//!
//! disconnect(hub, spoke)
//!     ├─ hub.is_connected && spoke attached to hub ─► hub.enact_disconnection(),
//!     │                                               attachment cleared,
//!     │                                               spoke.on_disconnection_outcome(true)
//!     └─ otherwise ─────────────────────────────────► spoke.on_disconnection_outcome(false)
//! ```
//!
//! Connect is two-phase and can fail after the hub applied its side effect.
//! Disconnect is one-phase and cannot be refused by the spoke.
//!
//! # Authority
//!
//! "Is this spoke attached to me" is decided by the hub ([`Hub::is_connected`]).
//! "Which hub am I attached to" is decided by the spoke's [`Attachment`].
//! Disconnect requires both to agree.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::core::{HubId, SpokeId};
use crate::error::BrokerError;

// =============================================================================
// Attachment (spoke-side state)
// =============================================================================

/// One live attachment of a spoke to a hub.
///
/// The epoch increases on every successful attach of the same spoke, so a
/// session that ended and a later session with the same hub never compare
/// equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Session {
    /// The hub the spoke is attached to.
    pub hub: HubId,
    /// Per-spoke attach counter.
    pub epoch: u64,
}

/// Connection state of a spoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not attached to any hub.
    #[default]
    Unattached,
    /// Attached to exactly one hub.
    Attached(Session),
}

#[derive(Debug, Default)]
struct AttachmentInner {
    state: ConnectionState,
    epochs: u64,
}

/// Spoke-side connection record.
///
/// Every spoke embeds one `Attachment` per role it plays and hands it out
/// from its `attachment()` accessor. Only the protocol functions in this
/// module change it.
///
/// # Example
///
/// ```ignore
/// struct Ticker {
///     attachment: Attachment,
/// }
///
/// let ticker = Ticker { attachment: Attachment::new() };
/// assert!(!ticker.attachment.is_attached());
/// ```
#[derive(Debug)]
pub struct Attachment {
    spoke: SpokeId,
    inner: Mutex<AttachmentInner>,
}

impl Attachment {
    /// Create an unattached record with a fresh spoke id.
    pub fn new() -> Self {
        Self::with_id(SpokeId::new())
    }

    /// Create an unattached record for a known spoke id.
    pub fn with_id(spoke: SpokeId) -> Self {
        Self {
            spoke,
            inner: Mutex::new(AttachmentInner::default()),
        }
    }

    /// The id of the spoke owning this record.
    pub fn spoke_id(&self) -> SpokeId {
        self.spoke
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// The current session, if attached.
    pub fn session(&self) -> Option<Session> {
        match self.lock().state {
            ConnectionState::Attached(session) => Some(session),
            ConnectionState::Unattached => None,
        }
    }

    /// The hub this spoke is attached to, if any.
    pub fn hub(&self) -> Option<HubId> {
        self.session().map(|s| s.hub)
    }

    /// Returns true if attached to any hub.
    pub fn is_attached(&self) -> bool {
        self.session().is_some()
    }

    /// Returns true if attached to the given hub.
    pub fn is_attached_to(&self, hub: HubId) -> bool {
        self.hub() == Some(hub)
    }

    pub(crate) fn attach(&self, hub: HubId) -> Session {
        let mut inner = self.lock();
        inner.epochs += 1;
        let session = Session {
            hub,
            epoch: inner.epochs,
        };
        inner.state = ConnectionState::Attached(session);
        session
    }

    pub(crate) fn detach(&self) -> Option<Session> {
        let mut inner = self.lock();
        match std::mem::take(&mut inner.state) {
            ConnectionState::Attached(session) => Some(session),
            ConnectionState::Unattached => None,
        }
    }

    // A panic inside a spoke hook must not wedge the record.
    fn lock(&self) -> MutexGuard<'_, AttachmentInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Attachment {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Role traits
// =============================================================================

/// Anything with a hub identity.
///
/// Split from [`Hub`] so one object can be a hub for several spoke roles
/// while keeping a single identity.
pub trait HubIdentity {
    /// The identity recorded by spokes attached to this hub.
    fn hub_id(&self) -> HubId;
}

/// Admission policy and bookkeeping of a hub for spokes of type `S`.
///
/// `S` is usually a role trait object (`dyn View<C>`, `dyn Submitter<C>`),
/// which lets heterogeneous spokes attach to the same hub.
pub trait Hub<S: ?Sized>: HubIdentity {
    /// Opaque value supplied by whoever initiates a connection.
    ///
    /// Passed unmodified to [`is_connection_allowed`](Hub::is_connection_allowed),
    /// [`enact_connection`](Hub::enact_connection) and the spoke's outcome hook.
    type Context;

    /// Admission policy.
    fn is_connection_allowed(&self, spoke: &S, context: &Self::Context) -> bool;

    /// Admit the spoke. Runs before the spoke is told, and is undone with
    /// [`enact_disconnection`](Hub::enact_disconnection) if the spoke declines.
    fn enact_connection(&mut self, spoke: &Arc<S>, context: &Self::Context);

    /// Whether the hub considers the spoke admitted.
    fn is_connected(&self, spoke: &S) -> bool;

    /// Evict the spoke, removing every trace of its admission.
    fn enact_disconnection(&mut self, spoke: &S);
}

/// Spoke side of the handshake, as seen by a hub of type `H` with
/// connection context `C`.
///
/// Role traits ([`View`](crate::View), [`Submitter`](crate::Submitter))
/// implement this for their trait objects; implement it directly for custom
/// roles.
pub trait Spoke<H: ?Sized, C> {
    /// The spoke's connection record for this role.
    fn attachment(&self) -> &Attachment;

    /// Called once per connection attempt.
    ///
    /// With `accepted == false` the attempt is already refused and the return
    /// value is ignored. With `accepted == true` the spoke is tentatively
    /// attached; returning `false` refuses and rolls the hub back.
    fn on_connection_outcome(self: Arc<Self>, _hub: &mut H, _context: &C, accepted: bool) -> bool {
        accepted
    }

    /// Called once per disconnection attempt, after the attachment is cleared
    /// when `accepted` is true.
    fn on_disconnection_outcome(&self, _hub: &H, _accepted: bool) {}
}

// =============================================================================
// Protocol
// =============================================================================

/// Attach `spoke` to `hub`.
///
/// Returns the reason when the spoke ends up unattached. The spoke's own
/// hook only ever sees an accepted/refused flag.
pub fn connect<H, S>(hub: &mut H, spoke: &Arc<S>, context: H::Context) -> Result<(), BrokerError>
where
    H: Hub<S>,
    S: Spoke<H, H::Context> + ?Sized,
{
    let hub_id = hub.hub_id();
    let spoke_id = spoke.attachment().spoke_id();

    let refusal = if let Some(current) = spoke.attachment().hub() {
        Some(BrokerError::AlreadyAttached {
            hub: current,
            spoke: spoke_id,
        })
    } else if !hub.is_connection_allowed(spoke, &context) {
        Some(BrokerError::ConnectionRefused {
            hub: hub_id,
            spoke: spoke_id,
        })
    } else {
        None
    };

    if let Some(err) = refusal {
        debug!(hub = %hub_id, spoke = %spoke_id, reason = %err, "connection refused");
        <S as Spoke<H, H::Context>>::on_connection_outcome(Arc::clone(spoke), hub, &context, false);
        return Err(err);
    }

    hub.enact_connection(spoke, &context);
    let session = spoke.attachment().attach(hub_id);

    let confirmed =
        <S as Spoke<H, H::Context>>::on_connection_outcome(Arc::clone(spoke), hub, &context, true);

    if !confirmed {
        spoke.attachment().detach();
        hub.enact_disconnection(spoke);
        warn!(hub = %hub_id, spoke = %spoke_id, "spoke declined connection, admission rolled back");
        return Err(BrokerError::SpokeDeclined {
            hub: hub_id,
            spoke: spoke_id,
        });
    }

    debug!(hub = %hub_id, spoke = %spoke_id, epoch = session.epoch, "spoke connected");
    Ok(())
}

/// Detach `spoke` from `hub`.
///
/// Both sides must agree the spoke is attached to this hub; otherwise the
/// spoke is told the disconnection was refused and nothing changes.
pub fn disconnect<H, S>(hub: &mut H, spoke: &Arc<S>) -> Result<(), BrokerError>
where
    H: Hub<S>,
    S: Spoke<H, H::Context> + ?Sized,
{
    let hub_id = hub.hub_id();
    let spoke_id = spoke.attachment().spoke_id();

    if !(spoke.attachment().is_attached_to(hub_id) && hub.is_connected(spoke)) {
        debug!(hub = %hub_id, spoke = %spoke_id, "disconnection refused: not attached");
        <S as Spoke<H, H::Context>>::on_disconnection_outcome(spoke, hub, false);
        return Err(BrokerError::NotAttached {
            hub: hub_id,
            spoke: spoke_id,
        });
    }

    hub.enact_disconnection(spoke);
    spoke.attachment().detach();
    <S as Spoke<H, H::Context>>::on_disconnection_outcome(spoke, hub, true);

    debug!(hub = %hub_id, spoke = %spoke_id, "spoke disconnected");
    Ok(())
}

// =============================================================================
// Roster (hub-side helper)
// =============================================================================

/// Admitted spokes of a hub, in admission order.
///
/// A ready-made backing store for the [`Hub`] hooks:
///
/// ```ignore
/// impl Hub<dyn View<Token>> for Model {
///     type Context = Token;
///
///     fn is_connection_allowed(&self, _: &dyn View<Token>, token: &Token) -> bool {
///         token.is_valid() && self.roster.has_room()
///     }
///     fn enact_connection(&mut self, view: &Arc<dyn View<Token>>, _: &Token) {
///         self.roster.admit(view.attachment().spoke_id());
///     }
///     fn is_connected(&self, view: &dyn View<Token>) -> bool {
///         self.roster.contains(view.attachment().spoke_id())
///     }
///     fn enact_disconnection(&mut self, view: &dyn View<Token>) {
///         let id = view.attachment().spoke_id();
///         self.roster.evict(id);
///         self.listeners.unregister(id);
///     }
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Roster {
    spokes: Vec<SpokeId>,
    max_spokes: Option<usize>,
}

impl Roster {
    /// Create an unbounded, empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the number of admitted spokes.
    pub fn with_max_spokes(mut self, max: usize) -> Self {
        self.max_spokes = Some(max);
        self
    }

    /// Configured limit, if any.
    pub fn max_spokes(&self) -> Option<usize> {
        self.max_spokes
    }

    /// Returns true if another spoke may be admitted.
    pub fn has_room(&self) -> bool {
        self.max_spokes.map_or(true, |max| self.spokes.len() < max)
    }

    /// Admit a spoke. Returns false if it was already admitted or the
    /// roster is full.
    pub fn admit(&mut self, spoke: SpokeId) -> bool {
        if self.contains(spoke) || !self.has_room() {
            return false;
        }
        self.spokes.push(spoke);
        true
    }

    /// Evict a spoke. Returns false if it was not admitted.
    pub fn evict(&mut self, spoke: SpokeId) -> bool {
        let before = self.spokes.len();
        self.spokes.retain(|s| *s != spoke);
        self.spokes.len() != before
    }

    /// Returns true if the spoke is admitted.
    pub fn contains(&self, spoke: SpokeId) -> bool {
        self.spokes.contains(&spoke)
    }

    /// Number of admitted spokes.
    pub fn len(&self) -> usize {
        self.spokes.len()
    }

    /// Returns true if no spoke is admitted.
    pub fn is_empty(&self) -> bool {
        self.spokes.is_empty()
    }

    /// Admitted spokes in admission order.
    pub fn iter(&self) -> impl Iterator<Item = SpokeId> + '_ {
        self.spokes.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTEXT: u32 = 1_325_465_319;

    struct Switch {
        id: HubId,
        roster: Roster,
        allow: bool,
        admissions: Vec<(SpokeId, u32)>,
        evictions: Vec<SpokeId>,
    }

    impl Switch {
        fn new() -> Self {
            Self {
                id: HubId::new(),
                roster: Roster::new(),
                allow: true,
                admissions: Vec::new(),
                evictions: Vec::new(),
            }
        }
    }

    impl HubIdentity for Switch {
        fn hub_id(&self) -> HubId {
            self.id
        }
    }

    impl Hub<Probe> for Switch {
        type Context = u32;

        fn is_connection_allowed(&self, _spoke: &Probe, _context: &u32) -> bool {
            self.allow && self.roster.has_room()
        }

        fn enact_connection(&mut self, spoke: &Arc<Probe>, context: &u32) {
            let id = spoke.attachment.spoke_id();
            self.roster.admit(id);
            self.admissions.push((id, *context));
        }

        fn is_connected(&self, spoke: &Probe) -> bool {
            self.roster.contains(spoke.attachment.spoke_id())
        }

        fn enact_disconnection(&mut self, spoke: &Probe) {
            let id = spoke.attachment.spoke_id();
            self.roster.evict(id);
            self.evictions.push(id);
        }
    }

    #[derive(Default)]
    struct Probe {
        attachment: Attachment,
        decline: bool,
        connections: Mutex<Vec<(bool, u32)>>,
        disconnections: Mutex<Vec<bool>>,
        admitted_when_told: Mutex<Option<bool>>,
    }

    impl Probe {
        fn declining() -> Self {
            Self {
                decline: true,
                ..Self::default()
            }
        }

        fn connections(&self) -> Vec<(bool, u32)> {
            self.connections.lock().unwrap().clone()
        }

        fn disconnections(&self) -> Vec<bool> {
            self.disconnections.lock().unwrap().clone()
        }
    }

    impl Spoke<Switch, u32> for Probe {
        fn attachment(&self) -> &Attachment {
            &self.attachment
        }

        fn on_connection_outcome(
            self: Arc<Self>,
            hub: &mut Switch,
            context: &u32,
            accepted: bool,
        ) -> bool {
            self.connections.lock().unwrap().push((accepted, *context));
            if accepted {
                *self.admitted_when_told.lock().unwrap() =
                    Some(hub.roster.contains(self.attachment.spoke_id()));
            }
            accepted && !self.decline
        }

        fn on_disconnection_outcome(&self, _hub: &Switch, accepted: bool) {
            self.disconnections.lock().unwrap().push(accepted);
        }
    }

    #[test]
    fn test_connect_and_disconnect() {
        let mut hub = Switch::new();
        let probe = Arc::new(Probe::default());

        connect(&mut hub, &probe, CONTEXT).unwrap();

        assert_eq!(probe.attachment.hub(), Some(hub.id));
        assert!(hub.roster.contains(probe.attachment.spoke_id()));
        assert_eq!(probe.connections(), vec![(true, CONTEXT)]);

        disconnect(&mut hub, &probe).unwrap();

        assert_eq!(probe.attachment.state(), ConnectionState::Unattached);
        assert!(hub.roster.is_empty());
        assert_eq!(probe.disconnections(), vec![true]);
    }

    #[test]
    fn test_context_reaches_hub_and_spoke_unmodified() {
        let mut hub = Switch::new();
        let probe = Arc::new(Probe::default());

        connect(&mut hub, &probe, 7).unwrap();

        assert_eq!(hub.admissions, vec![(probe.attachment.spoke_id(), 7)]);
        assert_eq!(probe.connections(), vec![(true, 7)]);
    }

    #[test]
    fn test_hub_admits_before_spoke_is_told() {
        let mut hub = Switch::new();
        let probe = Arc::new(Probe::default());

        connect(&mut hub, &probe, CONTEXT).unwrap();

        assert_eq!(*probe.admitted_when_told.lock().unwrap(), Some(true));
    }

    #[test]
    fn test_policy_rejection_changes_nothing() {
        let mut hub = Switch::new();
        hub.allow = false;
        let probe = Arc::new(Probe::default());

        let err = connect(&mut hub, &probe, CONTEXT).unwrap_err();

        assert!(matches!(err, BrokerError::ConnectionRefused { .. }));
        assert!(!probe.attachment.is_attached());
        assert!(hub.admissions.is_empty());
        assert_eq!(probe.connections(), vec![(false, CONTEXT)]);
    }

    #[test]
    fn test_already_attached_spoke_is_refused() {
        let mut first = Switch::new();
        let mut second = Switch::new();
        let probe = Arc::new(Probe::default());

        connect(&mut first, &probe, CONTEXT).unwrap();
        let err = connect(&mut second, &probe, CONTEXT).unwrap_err();

        assert_eq!(
            err,
            BrokerError::AlreadyAttached {
                hub: first.id,
                spoke: probe.attachment.spoke_id()
            }
        );
        assert_eq!(probe.attachment.hub(), Some(first.id));
        assert!(second.admissions.is_empty());
        assert_eq!(probe.connections(), vec![(true, CONTEXT), (false, CONTEXT)]);
    }

    #[test]
    fn test_connecting_twice_to_same_hub_is_refused() {
        let mut hub = Switch::new();
        let probe = Arc::new(Probe::default());

        connect(&mut hub, &probe, CONTEXT).unwrap();
        let err = connect(&mut hub, &probe, CONTEXT).unwrap_err();

        assert!(matches!(err, BrokerError::AlreadyAttached { .. }));
        assert_eq!(hub.admissions.len(), 1);
        assert_eq!(hub.roster.len(), 1);
    }

    #[test]
    fn test_declining_spoke_rolls_back_admission() {
        let mut hub = Switch::new();
        let probe = Arc::new(Probe::declining());

        let err = connect(&mut hub, &probe, CONTEXT).unwrap_err();

        assert!(matches!(err, BrokerError::SpokeDeclined { .. }));
        assert!(!probe.attachment.is_attached());
        assert_eq!(hub.admissions.len(), 1);
        assert_eq!(hub.evictions, vec![probe.attachment.spoke_id()]);
        assert!(hub.roster.is_empty());
    }

    #[test]
    fn test_disconnect_unattached_spoke_is_refused() {
        let mut hub = Switch::new();
        let probe = Arc::new(Probe::default());

        let err = disconnect(&mut hub, &probe).unwrap_err();

        assert!(matches!(err, BrokerError::NotAttached { .. }));
        assert!(hub.evictions.is_empty());
        assert_eq!(probe.disconnections(), vec![false]);
    }

    #[test]
    fn test_disconnect_from_wrong_hub_is_refused() {
        let mut first = Switch::new();
        let mut second = Switch::new();
        let probe = Arc::new(Probe::default());

        connect(&mut first, &probe, CONTEXT).unwrap();
        let err = disconnect(&mut second, &probe).unwrap_err();

        assert!(matches!(err, BrokerError::NotAttached { .. }));
        assert_eq!(probe.attachment.hub(), Some(first.id));
        assert!(first.roster.contains(probe.attachment.spoke_id()));
    }

    #[test]
    fn test_disconnect_requires_hub_agreement() {
        let mut hub = Switch::new();
        let probe = Arc::new(Probe::default());

        connect(&mut hub, &probe, CONTEXT).unwrap();
        // The hub forgets the spoke behind the protocol's back.
        hub.roster.evict(probe.attachment.spoke_id());

        let err = disconnect(&mut hub, &probe).unwrap_err();

        assert!(matches!(err, BrokerError::NotAttached { .. }));
        assert!(probe.attachment.is_attached());
        assert!(hub.evictions.is_empty());
    }

    #[test]
    fn test_reconnect_starts_new_session() {
        let mut hub = Switch::new();
        let probe = Arc::new(Probe::default());

        connect(&mut hub, &probe, CONTEXT).unwrap();
        let first = probe.attachment.session().unwrap();
        disconnect(&mut hub, &probe).unwrap();
        connect(&mut hub, &probe, CONTEXT).unwrap();
        let second = probe.attachment.session().unwrap();

        assert_eq!(first.hub, second.hub);
        assert!(second.epoch > first.epoch);
        assert_ne!(first, second);
    }

    #[test]
    fn test_roster_limit_is_admission_policy() {
        let mut hub = Switch::new();
        hub.roster = Roster::new().with_max_spokes(1);
        let a = Arc::new(Probe::default());
        let b = Arc::new(Probe::default());

        connect(&mut hub, &a, CONTEXT).unwrap();
        let err = connect(&mut hub, &b, CONTEXT).unwrap_err();

        assert!(matches!(err, BrokerError::ConnectionRefused { .. }));
        disconnect(&mut hub, &a).unwrap();
        connect(&mut hub, &b, CONTEXT).unwrap();
    }

    #[test]
    fn test_roster_admit_and_evict() {
        let mut roster = Roster::new();
        let a = SpokeId::new();
        let b = SpokeId::new();

        assert!(roster.admit(a));
        assert!(!roster.admit(a));
        assert!(roster.admit(b));
        assert_eq!(roster.iter().collect::<Vec<_>>(), vec![a, b]);

        assert!(roster.evict(a));
        assert!(!roster.evict(a));
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.max_spokes(), None);
    }

    #[test]
    fn test_poisoned_attachment_is_recovered() {
        let attachment = Arc::new(Attachment::new());
        let poisoner = Arc::clone(&attachment);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.inner.lock().unwrap();
            panic!("poisoning attachment");
        })
        .join();

        assert!(attachment.inner.is_poisoned());
        assert_eq!(attachment.state(), ConnectionState::Unattached);
        attachment.attach(HubId::new());
        assert!(attachment.is_attached());
    }

    #[test]
    fn test_attachment_detach_when_unattached() {
        let attachment = Attachment::new();
        assert_eq!(attachment.detach(), None);
        assert_eq!(attachment.state(), ConnectionState::Unattached);
    }
}

//! Typed event fan-out: emitters broadcast, views listen.
//!
//! # Roles
//!
//! | Role                 | Trait          | Side  |
//! |----------------------|----------------|-------|
//! | Event kind           | [`EventKind`]  | data  |
//! | Listener for a kind  | [`Listener`]   | spoke |
//! | Connecting client    | [`View`]       | spoke |
//! | Per-kind hub hooks   | [`Emits`]      | hub   |
//! | Closed kind set      | [`Emitter`]    | hub   |
//!
//! An emitter declares a closed set of event kinds ([`Emitter::event_kinds`]).
//! When a view connects, it declares the kinds it listens to as
//! [`Capabilities`]; the emitter registers it once per kind in both sets and
//! hands it that kind's initialization payload.
//!
//! # Generic events
//!
//! A value whose concrete kind is not known statically travels as
//! `&dyn` [`EventView`]. Propagation asks it for each declared kind in turn;
//! a value that answers for several kinds reaches the listeners of each.
//!
//! ```text
//! propagate_generic_event(bulletin)
//!     ├─ kind Headline: bulletin.view(Headline) ─ Some ─► Headline listeners
//!     └─ kind Score:    bulletin.view(Score)    ─ Some ─► Score listeners
//! ```

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::connection::{Attachment, HubIdentity, Spoke};
use crate::core::{HubId, SpokeId};
use crate::error::BrokerError;

// =============================================================================
// Event kinds and listeners
// =============================================================================

/// A concrete event type an emitter can broadcast.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Clone)]
/// struct Headline(String);
///
/// impl EventKind for Headline {
///     // Delivered once to every newly registered listener.
///     type InitData = Vec<Headline>;
/// }
/// ```
pub trait EventKind: Any + Send + Sync {
    /// Payload delivered once to a newly registered listener of this kind.
    type InitData;
}

/// Receiver of one event kind.
pub trait Listener<E: EventKind>: Send + Sync {
    /// Called for every propagated event that passes the emitter's filter.
    fn handle_event(&self, event: &E);

    /// Called exactly once per registration, right after it is recorded.
    fn initialize(&self, data: E::InitData);
}

/// Shared handle to a listener.
pub type ListenerHandle<E> = Arc<dyn Listener<E>>;

/// One spoke registered as a listener of kind `E`.
pub struct Registration<E: EventKind> {
    spoke: SpokeId,
    listener: ListenerHandle<E>,
}

impl<E: EventKind> Registration<E> {
    /// Create a registration.
    pub fn new(spoke: SpokeId, listener: ListenerHandle<E>) -> Self {
        Self { spoke, listener }
    }

    /// The registered spoke.
    pub fn spoke_id(&self) -> SpokeId {
        self.spoke
    }

    /// The listener handle.
    pub fn listener(&self) -> &ListenerHandle<E> {
        &self.listener
    }
}

impl<E: EventKind> Clone for Registration<E> {
    fn clone(&self) -> Self {
        Self {
            spoke: self.spoke,
            listener: Arc::clone(&self.listener),
        }
    }
}

impl<E: EventKind> fmt::Debug for Registration<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("kind", &type_name::<E>())
            .field("spoke", &self.spoke)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Generic events
// =============================================================================

/// Capability query on an event whose concrete kind is not known statically.
///
/// Every [`EventKind`] answers for itself. A type carrying several kinds at
/// once implements this by hand:
///
/// ```ignore
/// struct Bulletin {
///     headline: Headline,
///     score: Score,
/// }
///
/// impl EventView for Bulletin {
///     fn view(&self, kind: TypeId) -> Option<&dyn Any> {
///         if kind == TypeId::of::<Headline>() {
///             Some(&self.headline)
///         } else if kind == TypeId::of::<Score>() {
///             Some(&self.score)
///         } else {
///             None
///         }
///     }
/// }
/// ```
pub trait EventView {
    /// View this event as the kind with the given `TypeId`, if it is one.
    fn view(&self, kind: TypeId) -> Option<&dyn Any>;
}

impl<E: EventKind> EventView for E {
    fn view(&self, kind: TypeId) -> Option<&dyn Any> {
        (kind == TypeId::of::<E>()).then_some(self as &dyn Any)
    }
}

/// View a generic event as kind `E`.
///
/// A mismatch is an ordinary `None`, never a fault.
pub fn narrow<E, G>(generic: &G) -> Option<&E>
where
    E: EventKind,
    G: EventView + ?Sized,
{
    generic.view(TypeId::of::<E>())?.downcast_ref::<E>()
}

// =============================================================================
// Capabilities
// =============================================================================

/// The typed listener handles a connecting view offers, keyed by kind.
pub struct Capabilities {
    spoke: SpokeId,
    listeners: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Capabilities {
    /// Empty capability set for a spoke.
    pub fn new(spoke: SpokeId) -> Self {
        Self {
            spoke,
            listeners: HashMap::new(),
        }
    }

    /// The spoke these capabilities belong to.
    pub fn spoke_id(&self) -> SpokeId {
        self.spoke
    }

    /// Offer a listener for kind `E`. A later offer for the same kind
    /// replaces the earlier one.
    pub fn listen<E: EventKind>(&mut self, listener: ListenerHandle<E>) -> &mut Self {
        self.listeners.insert(TypeId::of::<E>(), Box::new(listener));
        self
    }

    /// The listener offered for kind `E`, if any.
    pub fn listener<E: EventKind>(&self) -> Option<ListenerHandle<E>> {
        self.listeners
            .get(&TypeId::of::<E>())?
            .downcast_ref::<ListenerHandle<E>>()
            .cloned()
    }

    /// A registration for kind `E`, if a listener was offered.
    pub fn registration<E: EventKind>(&self) -> Option<Registration<E>> {
        self.listener::<E>()
            .map(|listener| Registration::new(self.spoke, listener))
    }

    /// Returns true if a listener for kind `E` was offered.
    pub fn supports<E: EventKind>(&self) -> bool {
        self.listeners.contains_key(&TypeId::of::<E>())
    }

    /// Number of kinds offered.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Returns true if no kind was offered.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("spoke", &self.spoke)
            .field("kinds", &self.listeners.len())
            .finish()
    }
}

// =============================================================================
// View (listener spoke)
// =============================================================================

/// A spoke that connects to an emitter to listen for one or more kinds.
///
/// Hubs admit views as `dyn View<C>`, so views of different concrete types
/// can share an emitter.
///
/// # Example
///
/// ```ignore
/// struct Ticker {
///     attachment: Attachment,
/// }
///
/// impl Listener<Score> for Ticker {
///     fn handle_event(&self, score: &Score) { /* ... */ }
///     fn initialize(&self, history: Vec<Score>) { /* ... */ }
/// }
///
/// impl View<Token> for Ticker {
///     fn attachment(&self) -> &Attachment {
///         &self.attachment
///     }
///
///     fn declare_listeners(self: Arc<Self>, capabilities: &mut Capabilities) {
///         capabilities.listen::<Score>(self);
///     }
/// }
///
/// let ticker: Arc<dyn View<Token>> = Arc::new(Ticker { attachment: Attachment::new() });
/// connect(&mut model, &ticker, token)?;
/// ```
pub trait View<C>: Send + Sync {
    /// Connection record for this role.
    fn attachment(&self) -> &Attachment;

    /// Offer a listener for every kind this view handles.
    fn declare_listeners(self: Arc<Self>, capabilities: &mut Capabilities);

    /// Connection outcome. `accepted` is false when the hub refused or when
    /// none of the offered kinds is emitted by the hub. Returning false from
    /// an accepted attempt refuses the connection.
    fn on_connection_outcome(&self, _hub: HubId, _context: &C, accepted: bool) -> bool {
        accepted
    }

    /// Disconnection outcome.
    fn on_disconnection_outcome(&self, _hub: HubId, _accepted: bool) {}
}

impl<H, C> Spoke<H, C> for dyn View<C>
where
    H: Emitter,
    C: 'static,
{
    fn attachment(&self) -> &Attachment {
        View::attachment(self)
    }

    fn on_connection_outcome(self: Arc<Self>, hub: &mut H, context: &C, accepted: bool) -> bool {
        let hub_id = hub.hub_id();
        if !accepted {
            View::on_connection_outcome(&*self, hub_id, context, false);
            return false;
        }

        let mut capabilities = Capabilities::new(View::attachment(&*self).spoke_id());
        Arc::clone(&self).declare_listeners(&mut capabilities);

        if hub.register_listener(&capabilities) == 0 {
            debug!(
                hub = %hub_id,
                spoke = %capabilities.spoke_id(),
                offered = capabilities.len(),
                "view listens to no kind emitted by hub"
            );
            View::on_connection_outcome(&*self, hub_id, context, false);
            return false;
        }

        View::on_connection_outcome(&*self, hub_id, context, true)
    }

    fn on_disconnection_outcome(&self, hub: &H, accepted: bool) {
        View::on_disconnection_outcome(self, hub.hub_id(), accepted);
    }
}

// =============================================================================
// Emitter (hub side)
// =============================================================================

/// Per-kind hooks of an emitter.
pub trait Emits<E: EventKind> {
    /// Current listeners of kind `E`, in a stable order.
    fn listeners(&self) -> &[Registration<E>];

    /// Per-recipient filter, applied after kind matching.
    fn filter(&self, _event: &E, _listener: &Registration<E>) -> bool {
        true
    }

    /// Narrow a generic event to kind `E`.
    fn view_as<'a>(&self, generic: &'a dyn EventView) -> Option<&'a E> {
        narrow(generic)
    }

    /// Record a new listener. An error refuses this kind only.
    fn on_registered(&mut self, registration: Registration<E>) -> Result<(), BrokerError>;

    /// Initialization payload for a freshly recorded listener.
    fn init_data(&self, registration: &Registration<E>) -> E::InitData;

    /// Deliver `event` to every listener of kind `E` passing the filter.
    ///
    /// Returns the number of deliveries.
    fn propagate_event(&self, event: &E) -> usize {
        let mut delivered = 0;
        for registration in self.listeners() {
            if self.filter(event, registration) {
                trace!(kind = type_name::<E>(), spoke = %registration.spoke_id(), "delivering event");
                registration.listener().handle_event(event);
                delivered += 1;
            }
        }
        delivered
    }
}

/// One declared kind of an emitter, with its type-erased operations.
pub struct KindEntry<H> {
    kind: TypeId,
    name: &'static str,
    register: fn(&mut H, &Capabilities) -> bool,
    propagate: fn(&H, &dyn EventView) -> Option<usize>,
}

impl<H> KindEntry<H> {
    /// Entry for kind `E`.
    pub fn of<E>() -> Self
    where
        E: EventKind,
        H: Emits<E>,
    {
        Self {
            kind: TypeId::of::<E>(),
            name: type_name::<E>(),
            register: register_kind::<H, E>,
            propagate: propagate_kind::<H, E>,
        }
    }

    /// `TypeId` of the kind.
    pub fn kind(&self) -> TypeId {
        self.kind
    }

    /// Human-readable kind name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn register(&self, hub: &mut H, capabilities: &Capabilities) -> bool {
        (self.register)(hub, capabilities)
    }

    fn propagate(&self, hub: &H, generic: &dyn EventView) -> Option<usize> {
        (self.propagate)(hub, generic)
    }
}

impl<H> fmt::Debug for KindEntry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KindEntry").field("name", &self.name).finish()
    }
}

fn register_kind<H, E>(hub: &mut H, capabilities: &Capabilities) -> bool
where
    H: Emits<E>,
    E: EventKind,
{
    let Some(registration) = capabilities.registration::<E>() else {
        return false;
    };

    if let Err(err) = hub.on_registered(registration.clone()) {
        warn!(kind = type_name::<E>(), error = %err, "listener registration refused");
        return false;
    }

    let data = hub.init_data(&registration);
    registration.listener().initialize(data);

    debug!(kind = type_name::<E>(), spoke = %registration.spoke_id(), "listener registered");
    true
}

fn propagate_kind<H, E>(hub: &H, generic: &dyn EventView) -> Option<usize>
where
    H: Emits<E>,
    E: EventKind,
{
    let event = <H as Emits<E>>::view_as(hub, generic)?;
    Some(<H as Emits<E>>::propagate_event(hub, event))
}

/// The closed, ordered set of kinds an emitter supports.
pub struct KindSet<H> {
    entries: SmallVec<[KindEntry<H>; 4]>,
}

impl<H> KindSet<H> {
    /// Empty set.
    pub fn new() -> Self {
        Self {
            entries: SmallVec::new(),
        }
    }

    /// Declare kind `E`. Declaring a kind twice keeps the first entry.
    pub fn with<E>(mut self) -> Self
    where
        E: EventKind,
        H: Emits<E>,
    {
        if !self.contains::<E>() {
            self.entries.push(KindEntry::of::<E>());
        }
        self
    }

    /// Returns true if kind `E` is declared.
    pub fn contains<E: EventKind>(&self) -> bool {
        self.entries.iter().any(|e| e.kind == TypeId::of::<E>())
    }

    /// Declared kinds in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &KindEntry<H>> {
        self.entries.iter()
    }

    /// Number of declared kinds.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no kind is declared.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<H> Default for KindSet<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> fmt::Debug for KindSet<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| e.name))
            .finish()
    }
}

/// A hub that broadcasts a closed set of event kinds.
///
/// # Example
///
/// ```ignore
/// impl Emitter for Model {
///     fn event_kinds() -> KindSet<Self> {
///         KindSet::new().with::<Headline>().with::<Score>()
///     }
/// }
///
/// model.propagate_event(&Headline("markets up".into()));
/// model.propagate_generic_event(&bulletin);
/// model.propagate_events(&queued);
/// ```
pub trait Emitter: HubIdentity + Sized {
    /// The declared kinds, in the order they are tried.
    fn event_kinds() -> KindSet<Self>;

    /// Names of the declared kinds.
    fn kind_names() -> Vec<&'static str> {
        Self::event_kinds().iter().map(KindEntry::name).collect()
    }

    /// Register the offered listeners for every declared kind.
    ///
    /// Returns the number of kinds registered; zero means the spoke is not a
    /// listener of this emitter.
    fn register_listener(&mut self, capabilities: &Capabilities) -> usize {
        let mut registered = 0;
        for entry in Self::event_kinds().iter() {
            if entry.register(self, capabilities) {
                registered += 1;
            }
        }
        registered
    }

    /// Propagate an event of statically unknown kind as every declared kind
    /// it can be viewed as.
    ///
    /// Returns the total number of deliveries across kinds.
    fn propagate_generic_event(&self, generic: &dyn EventView) -> usize {
        let mut delivered = 0;
        for entry in Self::event_kinds().iter() {
            match entry.propagate(self, generic) {
                Some(n) => delivered += n,
                None => trace!(kind = entry.name(), "event does not view as kind"),
            }
        }
        delivered
    }

    /// Propagate a sequence of generic events, in order.
    fn propagate_events<I>(&self, events: I) -> usize
    where
        I: IntoIterator,
        I::Item: AsRef<dyn EventView>,
    {
        events
            .into_iter()
            .map(|event| self.propagate_generic_event(event.as_ref()))
            .sum()
    }
}

//! Registry of listener registries, one typed list per event kind.
//!
//! Emitters embed a [`ListenerRegistry`] and back their
//! [`Emits::listeners`](crate::Emits::listeners) and
//! [`Emits::on_registered`](crate::Emits::on_registered) hooks with it. The
//! registry is only mutated on register/unregister (connect, disconnect,
//! rollback) and only read during propagation.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::core::SpokeId;
use crate::error::BrokerError;
use crate::fanout::{EventKind, Registration};

/// Type-erased listener list of one kind.
trait KindListeners: Send + Sync {
    fn unregister(&mut self, spoke: SpokeId) -> bool;
    fn contains(&self, spoke: SpokeId) -> bool;
    fn len(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct Listeners<E: EventKind>(Vec<Registration<E>>);

impl<E: EventKind> KindListeners for Listeners<E> {
    fn unregister(&mut self, spoke: SpokeId) -> bool {
        let before = self.0.len();
        self.0.retain(|r| r.spoke_id() != spoke);
        self.0.len() != before
    }

    fn contains(&self, spoke: SpokeId) -> bool {
        self.0.iter().any(|r| r.spoke_id() == spoke)
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct KindSlot {
    name: &'static str,
    listeners: Box<dyn KindListeners>,
}

/// Listener registrations of an emitter, keyed by event kind.
///
/// Each kind keeps its listeners in registration order, which is the order
/// propagation visits them.
///
/// # Example
///
/// ```ignore
/// impl Emits<Headline> for Model {
///     fn listeners(&self) -> &[Registration<Headline>] {
///         self.listeners.listeners::<Headline>()
///     }
///
///     fn on_registered(&mut self, registration: Registration<Headline>) -> Result<(), BrokerError> {
///         self.listeners.register(registration)
///     }
///
///     fn init_data(&self, _: &Registration<Headline>) -> Vec<Headline> {
///         self.recent_headlines.clone()
///     }
/// }
/// ```
#[derive(Default)]
pub struct ListenerRegistry {
    kinds: HashMap<TypeId, KindSlot>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a listener of kind `E`.
    ///
    /// # Errors
    ///
    /// [`BrokerError::AlreadyRegistered`] if the spoke already listens to
    /// `E`; the registry is left untouched.
    pub fn register<E: EventKind>(&mut self, registration: Registration<E>) -> Result<(), BrokerError> {
        let slot = self.kinds.entry(TypeId::of::<E>()).or_insert_with(|| KindSlot {
            name: type_name::<E>(),
            listeners: Box::new(Listeners::<E>(Vec::new())),
        });

        let spoke = registration.spoke_id();
        if slot.listeners.contains(spoke) {
            return Err(BrokerError::AlreadyRegistered {
                kind: slot.name,
                spoke,
            });
        }

        match slot.listeners.as_any_mut().downcast_mut::<Listeners<E>>() {
            Some(list) => {
                list.0.push(registration);
                Ok(())
            }
            // Slots are keyed by TypeId::of::<E>() and built as Listeners<E>.
            None => unreachable!("listener slot for {} holds another kind", slot.name),
        }
    }

    /// Listeners of kind `E` in registration order.
    pub fn listeners<E: EventKind>(&self) -> &[Registration<E>] {
        self.kinds
            .get(&TypeId::of::<E>())
            .and_then(|slot| slot.listeners.as_any().downcast_ref::<Listeners<E>>())
            .map(|list| list.0.as_slice())
            .unwrap_or(&[])
    }

    /// Remove a spoke from every kind.
    ///
    /// Returns the number of kinds it was removed from.
    pub fn unregister(&mut self, spoke: SpokeId) -> usize {
        self.kinds
            .values_mut()
            .filter_map(|slot| slot.listeners.unregister(spoke).then_some(slot.name))
            .inspect(|kind| debug!(kind, %spoke, "listener unregistered"))
            .count()
    }

    /// Returns true if the spoke listens to kind `E`.
    pub fn is_registered<E: EventKind>(&self, spoke: SpokeId) -> bool {
        self.kinds
            .get(&TypeId::of::<E>())
            .is_some_and(|slot| slot.listeners.contains(spoke))
    }

    /// Names of the kinds the spoke listens to.
    pub fn kinds_of(&self, spoke: SpokeId) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self
            .kinds
            .values()
            .filter(|slot| slot.listeners.contains(spoke))
            .map(|slot| slot.name)
            .collect();
        kinds.sort_unstable();
        kinds
    }

    /// Number of listeners of kind `E`.
    pub fn len<E: EventKind>(&self) -> usize {
        self.listeners::<E>().len()
    }

    /// Number of registrations across all kinds.
    pub fn total(&self) -> usize {
        self.kinds.values().map(|slot| slot.listeners.len()).sum()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.kinds
                    .values()
                    .map(|slot| (slot.name, slot.listeners.len())),
            )
            .finish()
    }
}

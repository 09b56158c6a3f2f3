//! Identities shared by every switchboard role.
//!
//! Hubs and spokes never hold references to each other. The relationship is
//! a back-reference (the spoke remembers a [`HubId`]) plus a forward registry
//! (the hub remembers [`SpokeId`]s), and the disconnect protocol keeps the two
//! consistent.

use std::fmt;

use uuid::Uuid;

/// Identity of a hub.
///
/// A spoke records the `HubId` of the hub it is attached to. Two hub values
/// are the same hub exactly when their ids are equal.
///
/// # Example
///
/// ```ignore
/// use switchboard::HubId;
///
/// struct Model {
///     id: HubId,
/// }
///
/// let model = Model { id: HubId::new() };
/// assert!(model.id != HubId::new());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HubId(Uuid);

impl HubId {
    /// Create a new random hub id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get a reference to the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for HubId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for HubId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for HubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hub:{}", self.0)
    }
}

/// Identity of a spoke.
///
/// Every [`Attachment`](crate::Attachment) carries one. Hubs key their
/// admission and listener bookkeeping by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpokeId(Uuid);

impl SpokeId {
    /// Create a new random spoke id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get a reference to the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SpokeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SpokeId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for SpokeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "spoke:{}", self.0)
    }
}

/// Identity of a deferred request held by an input bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Create a new random request id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request:{}", self.0)
    }
}

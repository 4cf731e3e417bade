//! Object liveness.
//!
//! An [`ObjectRef`] trusts its bits: it is only valid while the engine keeps
//! the object alive. An [`InstanceId`] is the engine's stable ID for an object
//! and can be kept across frames and threads; it must be upgraded, which
//! checks the engine's instance table, before the object can be used.

use std::fmt;

use crate::api::NativeApi;
use crate::error::BridgeError;
use crate::handle::{ObjectRef, Ownership};

/// The engine's ID for an object instance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    pub const fn from_raw(id: u64) -> Self {
        InstanceId(id)
    }

    pub const fn to_raw(self) -> u64 {
        self.0
    }

    /// The object, if it still exists.
    pub fn upgrade(self, api: &NativeApi) -> Option<ObjectRef> {
        match api.instance_from_id(self.0) {
            0 => None,
            object => Some(ObjectRef::encode(object, Ownership::Borrowed)),
        }
    }

    /// As [`upgrade`](Self::upgrade), reporting a destroyed object as an error.
    pub fn try_upgrade(self, api: &NativeApi) -> Result<ObjectRef, BridgeError> {
        self.upgrade(api)
            .ok_or(BridgeError::StaleInstance { id: self.0 })
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({})", self.0)
    }
}

impl ObjectRef {
    /// Wrap an object pointer known to be alive, such as a fresh allocation.
    #[inline]
    pub const fn assume_alive(object: u64) -> Self {
        ObjectRef::encode(object, Ownership::Borrowed)
    }

    /// The object's instance ID, `None` for the null object.
    pub fn instance_id(self, api: &NativeApi) -> Option<InstanceId> {
        if self.is_null() {
            return None;
        }
        Some(InstanceId(api.instance_id(self.payload())))
    }
}

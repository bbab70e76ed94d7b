//! Handle registry
//!
//! Maps opaque handles to engine instances together with the engine-heap
//! region holding the instance's document bytes. Handles are never reused, so
//! a deleted handle can be told apart from one that never existed.

use std::collections::{HashMap, HashSet};

use crate::engine::{EngineInstance, Region};

use super::error::RemoteError;
use super::protocol::Handle;

pub const INSTANCE_DOES_NOT_EXIST: &str = "Class instance does not exist.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Class instance does not exist.")]
    Unknown(Handle),
    #[error("Class instance does not exist. (handle {0} was deleted)")]
    Deleted(Handle),
}

impl From<RegistryError> for RemoteError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Unknown(_) => RemoteError::invocation(err.to_string()),
            RegistryError::Deleted(_) => RemoteError::conflict(err.to_string()),
        }
    }
}

struct Slot {
    instance: Box<dyn EngineInstance>,
    buffer: Option<Region>,
}

/// Removed registry entry; the caller frees its buffer
pub struct Retired {
    pub instance: Box<dyn EngineInstance>,
    pub buffer: Option<Region>,
}

#[derive(Default)]
pub struct HandleRegistry {
    slots: HashMap<Handle, Slot>,
    retired: HashSet<Handle>,
    next_handle: u32,
}

impl HandleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self, handle: Handle) -> Result<(), RegistryError> {
        if self.slots.contains_key(&handle) {
            Ok(())
        } else if self.retired.contains(&handle) {
            Err(RegistryError::Deleted(handle))
        } else {
            Err(RegistryError::Unknown(handle))
        }
    }

    pub fn insert(&mut self, instance: Box<dyn EngineInstance>) -> Handle {
        self.next_handle += 1;
        let handle = Handle(self.next_handle);
        self.slots.insert(
            handle,
            Slot {
                instance,
                buffer: None,
            },
        );
        handle
    }

    pub fn instance_mut(
        &mut self,
        handle: Handle,
    ) -> Result<&mut Box<dyn EngineInstance>, RegistryError> {
        self.check(handle)?;
        self.slots
            .get_mut(&handle)
            .map(|slot| &mut slot.instance)
            .ok_or(RegistryError::Unknown(handle))
    }

    pub fn buffer(&self, handle: Handle) -> Result<Option<Region>, RegistryError> {
        self.check(handle)?;
        Ok(self.slots.get(&handle).and_then(|slot| slot.buffer))
    }

    /// Bind `region` to the instance, returning the region it replaces
    pub fn attach_buffer(
        &mut self,
        handle: Handle,
        region: Region,
    ) -> Result<Option<Region>, RegistryError> {
        self.check(handle)?;
        Ok(self
            .slots
            .get_mut(&handle)
            .and_then(|slot| slot.buffer.replace(region)))
    }

    pub fn remove(&mut self, handle: Handle) -> Result<Retired, RegistryError> {
        self.check(handle)?;
        let slot = self
            .slots
            .remove(&handle)
            .ok_or(RegistryError::Unknown(handle))?;
        self.retired.insert(handle);
        Ok(Retired {
            instance: slot.instance,
            buffer: slot.buffer,
        })
    }

    /// Drain every live instance, e.g. on shutdown
    pub fn drain(&mut self) -> Vec<(Handle, Retired)> {
        let handles: Vec<Handle> = self.slots.keys().copied().collect();
        handles
            .into_iter()
            .filter_map(|h| self.remove(h).ok().map(|r| (h, r)))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::error::RemoteErrorKind;
    use crate::bridge::value::Value;
    use crate::engine::{EngineHeap, InvokeError, NativeValue};

    struct Inert;

    impl EngineInstance for Inert {
        fn has_member(&self, _name: &str) -> bool {
            false
        }

        fn call(
            &mut self,
            _heap: &EngineHeap,
            method: &str,
            _params: &[Value],
        ) -> Result<NativeValue, InvokeError> {
            Err(InvokeError::UnknownMethod(method.to_string()))
        }

        fn property(&self, name: &str) -> Result<NativeValue, InvokeError> {
            Err(InvokeError::UnknownMethod(name.to_string()))
        }
    }

    #[test]
    fn handles_are_fresh() {
        let mut registry = HandleRegistry::new();
        let a = registry.insert(Box::new(Inert));
        registry.remove(a).ok();
        let b = registry.insert(Box::new(Inert));
        assert_ne!(a, b);
    }

    #[test]
    fn deleted_and_unknown_are_distinct() {
        let mut registry = HandleRegistry::new();
        let h = registry.insert(Box::new(Inert));
        assert!(registry.remove(h).is_ok());

        let deleted = registry.remove(h).err().unwrap();
        assert_eq!(deleted, RegistryError::Deleted(h));
        let remote = RemoteError::from(deleted);
        assert_eq!(remote.kind, RemoteErrorKind::ResourceConflict);
        assert!(remote.message.contains("instance does not exist"));

        let unknown = registry.buffer(Handle(99)).unwrap_err();
        assert_eq!(RemoteError::from(unknown).kind, RemoteErrorKind::Invocation);
    }

    #[test]
    fn attach_returns_previous_region() {
        let mut registry = HandleRegistry::new();
        let h = registry.insert(Box::new(Inert));
        let first = Region { offset: 8, len: 4 };
        let second = Region { offset: 16, len: 2 };
        assert_eq!(registry.attach_buffer(h, first), Ok(None));
        assert_eq!(registry.attach_buffer(h, second), Ok(Some(first)));
        assert_eq!(registry.remove(h).ok().and_then(|r| r.buffer), Some(second));
    }
}

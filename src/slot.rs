//! Explicit lifecycle state for GPU resources.
//!
//! Resources that are created, torn down and recreated over a window's
//! lifetime (swapchain, pipelines, per-image buffers) live in a `Slot`.
//! Installing into an occupied slot is an error; reading an absent one is an
//! error; taking from an absent one is a no-op, so teardown paths stay
//! idempotent.

use crate::error::{Result, VulkanError};

#[derive(Debug)]
pub enum Slot<T> {
    Absent,
    Present(T),
}

impl<T> Slot<T> {
    pub fn is_present(&self) -> bool {
        matches!(self, Slot::Present(_))
    }

    /// Places `value` into the slot. Errors if something already lives there.
    pub fn install(&mut self, value: T, what: &str) -> Result<()> {
        match self {
            Slot::Present(_) => Err(VulkanError::InvalidState(format!(
                "{} is already created; destroy it before creating again",
                what
            ))),
            Slot::Absent => {
                *self = Slot::Present(value);
                Ok(())
            }
        }
    }

    pub fn get(&self, what: &str) -> Result<&T> {
        match self {
            Slot::Present(value) => Ok(value),
            Slot::Absent => {
                Err(VulkanError::InvalidState(format!("{} has not been created", what)))
            }
        }
    }

    /// Empties the slot, returning the value if one was present.
    pub fn take(&mut self) -> Option<T> {
        match std::mem::replace(self, Slot::Absent) {
            Slot::Present(value) => Some(value),
            Slot::Absent => None,
        }
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Slot::Absent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_then_get_round_trips() {
        let mut slot = Slot::Absent;
        slot.install(7u32, "counter").unwrap();
        assert_eq!(*slot.get("counter").unwrap(), 7);
    }

    #[test]
    fn double_install_is_rejected() {
        let mut slot = Slot::Absent;
        slot.install(1u32, "counter").unwrap();
        assert!(matches!(
            slot.install(2u32, "counter"),
            Err(VulkanError::InvalidState(_))
        ));
    }

    #[test]
    fn get_on_absent_slot_errors() {
        let slot: Slot<u32> = Slot::Absent;
        assert!(matches!(slot.get("counter"), Err(VulkanError::InvalidState(_))));
    }

    #[test]
    fn take_is_idempotent() {
        let mut slot = Slot::Absent;
        slot.install(3u32, "counter").unwrap();
        assert_eq!(slot.take(), Some(3));
        assert_eq!(slot.take(), None);
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn take_then_install_allows_recreation() {
        let mut slot = Slot::Absent;
        slot.install(1u32, "counter").unwrap();
        slot.take();
        slot.install(2u32, "counter").unwrap();
        assert_eq!(*slot.get("counter").unwrap(), 2);
    }
}

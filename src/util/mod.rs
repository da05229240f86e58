//! Utility module
//!
//! This module provides the fixed-capacity arena backing the engine's
//! bounded tables, and logging setup.

use tracing::Level;

/// Stable reference to an arena slot
///
/// A handle stays valid until its slot is freed; reusing the slot bumps the
/// epoch so old handles no longer resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u16,
    epoch: u32,
}

impl Handle {
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

#[derive(Debug)]
struct Slot<T> {
    epoch: u32,
    value: Option<T>,
}

/// Arena of fixed capacity addressed by [`Handle`]s
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    len: usize,
}

impl<T> Arena<T> {
    /// Creates an arena holding at most `capacity` values (capped at `u16::MAX`)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.min(u16::MAX as usize);
        Arena {
            slots: (0..capacity).map(|_| Slot { epoch: 0, value: None }).collect(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    /// Stores a value, handing it back if every slot is taken
    pub fn insert(&mut self, value: T) -> Result<Handle, T> {
        let Some(index) = self.slots.iter().position(|s| s.value.is_none()) else {
            return Err(value);
        };
        let slot = &mut self.slots[index];
        slot.value = Some(value);
        self.len += 1;
        Ok(Handle {
            index: index as u16,
            epoch: slot.epoch,
        })
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.slots
            .get(handle.index())
            .filter(|s| s.epoch == handle.epoch)
            .and_then(|s| s.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index())
            .filter(|s| s.epoch == handle.epoch)
            .and_then(|s| s.value.as_mut())
    }

    /// Frees a slot, returning its value
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.epoch != handle.epoch {
            return None;
        }
        let value = slot.value.take()?;
        slot.epoch = slot.epoch.wrapping_add(1);
        self.len -= 1;
        Some(value)
    }

    /// Handle of the first live value matching `pred`
    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<Handle> {
        self.iter().find(|(_, v)| pred(v)).map(|(h, _)| h)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.value.as_ref().map(|v| {
                (
                    Handle {
                        index: i as u16,
                        epoch: s.epoch,
                    },
                    v,
                )
            })
        })
    }

    /// Frees every slot; outstanding handles stop resolving
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            if slot.value.take().is_some() {
                slot.epoch = slot.epoch.wrapping_add(1);
            }
        }
        self.len = 0;
    }
}

/// Installs a fmt subscriber at the given level; later calls are no-ops
pub fn init_logging(level: Level) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}

///
/// Slot registry backing every handle a context gives out.
///
/// A registry is a growable vector of slots, each either active (holding a
/// value and the generation it was created with) or free. Handles are
/// `(index, generation)` pairs; a handle whose slot was freed or recycled no
/// longer matches and is reported as invalid instead of aliasing whatever
/// lives there now.
///
/// Locking is two-level. Touching one slot ("holding" it) takes the vector's
/// shared lock plus the slot's own mutex. Growing, shrinking and draining take
/// the vector's exclusive lock, which cannot be granted while any slot is held,
/// so the backing storage never moves under a holder.
///

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{
    Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError,
};

use tracing::trace;

use crate::result::{MumError, PrimitiveKind};

/// Untyped handle: slot index plus the generation the slot had at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle {
    index: u32,
    generation: u32,
}

impl RawHandle {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

struct Entry<T> {
    generation: u32,
    value: T,
}

struct Slot<T> {
    state: Mutex<Option<Entry<T>>>,
}

pub(crate) struct Registry<T> {
    kind: PrimitiveKind,
    slots: RwLock<Vec<Slot<T>>>,
    next_generation: AtomicU32,
    capacity: usize,
    shrink_on_destroy: bool,
}

impl<T> Registry<T> {
    pub(crate) fn new(kind: PrimitiveKind, capacity: usize, shrink_on_destroy: bool) -> Self {
        Self {
            kind,
            slots: RwLock::new(Vec::with_capacity(capacity)),
            next_generation: AtomicU32::new(0),
            capacity,
            shrink_on_destroy,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Slot<T>>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Slot<T>>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_slot(slot: &Slot<T>) -> MutexGuard<'_, Option<Entry<T>>> {
        slot.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn invalid(&self) -> MumError {
        MumError::InvalidHandle { kind: self.kind }
    }

    /// Activate a free slot with `value`, growing the vector if none is free.
    ///
    /// Fails once the generation counter is exhausted rather than reissuing a
    /// generation a stale handle could still carry.
    pub(crate) fn insert(&self, value: T) -> Result<RawHandle, MumError> {
        let generation = self
            .next_generation
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |g| g.checked_add(1))
            .map_err(|_| MumError::AllocationFailed { kind: self.kind })?;

        {
            let slots = self.read();
            for (index, slot) in slots.iter().enumerate() {
                let mut state = match slot.state.try_lock() {
                    Ok(state) => state,
                    Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                    // Held by someone, so it is active.
                    Err(TryLockError::WouldBlock) => continue,
                };
                if state.is_none() {
                    *state = Some(Entry { generation, value });
                    trace!(kind = %self.kind, index, generation, "reused slot");
                    return Ok(RawHandle {
                        index: index as u32,
                        generation,
                    });
                }
            }
        }

        let mut slots = self.write();
        let index = u32::try_from(slots.len())
            .map_err(|_| MumError::AllocationFailed { kind: self.kind })?;
        slots
            .try_reserve(1)
            .map_err(|_| MumError::AllocationFailed { kind: self.kind })?;
        slots.push(Slot {
            state: Mutex::new(Some(Entry { generation, value })),
        });
        trace!(kind = %self.kind, index, generation, len = slots.len(), "grew registry");

        Ok(RawHandle { index, generation })
    }

    /// Hold the slot behind `handle` for the duration of `f`.
    pub(crate) fn with_hold<R>(
        &self,
        handle: RawHandle,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, MumError> {
        let slots = self.read();
        let slot = slots.get(handle.index as usize).ok_or_else(|| self.invalid())?;
        let mut state = Self::lock_slot(slot);
        match state.as_mut() {
            Some(entry) if entry.generation == handle.generation => Ok(f(&mut entry.value)),
            _ => Err(self.invalid()),
        }
    }

    /// Deactivate the slot behind `handle`, handing its value to `teardown`.
    ///
    /// If `teardown` fails it returns the value, which goes back into the slot
    /// so the handle stays valid.
    pub(crate) fn remove(
        &self,
        handle: RawHandle,
        teardown: impl FnOnce(T) -> Result<(), (T, MumError)>,
    ) -> Result<(), MumError> {
        {
            let slots = self.read();
            let slot = slots.get(handle.index as usize).ok_or_else(|| self.invalid())?;
            let mut state = Self::lock_slot(slot);
            let entry = match state.take() {
                Some(entry) if entry.generation == handle.generation => entry,
                other => {
                    *state = other;
                    return Err(self.invalid());
                }
            };
            if let Err((value, e)) = teardown(entry.value) {
                *state = Some(Entry {
                    generation: entry.generation,
                    value,
                });
                return Err(e);
            }
        }

        if self.shrink_on_destroy {
            self.shrink();
        }
        Ok(())
    }

    fn shrink(&self) {
        let mut slots = self.write();
        let before = slots.len();
        while slots.last_mut().is_some_and(|slot| {
            slot.state
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .is_none()
        }) {
            slots.pop();
        }
        if slots.len() != before {
            slots.shrink_to(self.capacity);
            trace!(kind = %self.kind, from = before, to = slots.len(), "shrank registry");
        }
    }

    /// Empty the registry, returning every active value.
    pub(crate) fn drain(&self) -> Vec<T> {
        let mut slots = self.write();
        slots
            .drain(..)
            .filter_map(|slot| slot.state.into_inner().unwrap_or_else(PoisonError::into_inner))
            .map(|entry| entry.value)
            .collect()
    }

    pub(crate) fn active_count(&self) -> usize {
        self.read()
            .iter()
            .filter(|slot| Self::lock_slot(slot).is_some())
            .count()
    }

    #[cfg(test)]
    pub(crate) fn slot_count(&self) -> usize {
        self.read().len()
    }
}

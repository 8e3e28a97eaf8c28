//! Typed object pools for the hot path (§4.A).
//!
//! `acquire` hands out a zero-valued-for-purpose instance; `release`
//! resets it and returns it to the free list. Pools never block — an
//! empty free list just allocates a new instance via `Default`.
//!
//! Holding a handle after releasing it is a programmer error. In debug
//! builds every handle carries the slot's generation at acquire time and
//! every access re-checks it against the slot's current generation, so a
//! stale handle panics instead of silently reading whatever the next
//! acquirer wrote.

use std::sync::Mutex;

struct Slot<T> {
    value: T,
    generation: u64,
    in_use: bool,
}

/// A pool of reusable `T` instances.
pub struct Pool<T> {
    slots: Mutex<Vec<Slot<T>>>,
}

impl<T: Default> Default for Pool<T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Default> Pool<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a slot, allocating a fresh `Default::default()` if the
    /// free list is empty.
    pub fn acquire(&self) -> PoolHandle<'_, T> {
        let mut slots = self.slots.lock().expect("pool mutex poisoned");
        let index = slots
            .iter()
            .position(|slot| !slot.in_use)
            .unwrap_or_else(|| {
                slots.push(Slot {
                    value: T::default(),
                    generation: 0,
                    in_use: false,
                });
                slots.len() - 1
            });
        let slot = &mut slots[index];
        slot.in_use = true;
        PoolHandle {
            pool: self,
            index,
            generation: slot.generation,
        }
    }

    fn release(&self, index: usize, generation: u64) {
        let mut slots = self.slots.lock().expect("pool mutex poisoned");
        let slot = &mut slots[index];
        debug_assert_eq!(
            slot.generation, generation,
            "released a pool handle whose generation no longer matches the slot \
             (double release or use-after-release)"
        );
        slot.in_use = false;
        slot.generation = slot.generation.wrapping_add(1);
    }

    fn with_slot<R>(&self, index: usize, generation: u64, f: impl FnOnce(&T) -> R) -> R {
        let slots = self.slots.lock().expect("pool mutex poisoned");
        let slot = &slots[index];
        debug_assert_eq!(
            slot.generation, generation,
            "accessed a pool handle after it was released (use-after-release)"
        );
        f(&slot.value)
    }

    fn with_slot_mut<R>(&self, index: usize, generation: u64, f: impl FnOnce(&mut T) -> R) -> R {
        let mut slots = self.slots.lock().expect("pool mutex poisoned");
        let slot = &mut slots[index];
        debug_assert_eq!(
            slot.generation, generation,
            "accessed a pool handle after it was released (use-after-release)"
        );
        f(&mut slot.value)
    }
}

/// A handle to a slot acquired from a [`Pool`]. `Drop` resets and returns
/// the slot automatically, but callers that want the explicit
/// acquire/release contract of §4.A can call [`PoolHandle::release`]
/// directly — it is equivalent to dropping the handle.
pub struct PoolHandle<'a, T: Default> {
    pool: &'a Pool<T>,
    index: usize,
    generation: u64,
}

impl<'a, T: Default> PoolHandle<'a, T> {
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.pool
            .with_slot(self.index, self.generation, |value| value.clone())
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.pool.with_slot(self.index, self.generation, f)
    }

    pub fn with_mut<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> R {
        self.pool.with_slot_mut(self.index, self.generation, f)
    }

    pub fn release(self) {
        // Drop runs the actual release logic.
    }
}

impl<'a, T: Default> Drop for PoolHandle<'a, T> {
    fn drop(&mut self) {
        self.pool.with_slot_mut(self.index, self.generation, |value| {
            *value = T::default();
        });
        self.pool.release(self.index, self.generation);
    }
}

/// A slab allocator with generation-tagged tokens.
///
/// A `Slab` stores values in a contiguous array and hands out `u64`
/// tokens that stay stable until the value is removed. Freed slots are
/// reused, but each removal bumps the slot's generation, so a token
/// that outlives its value can never resolve to a later occupant.
///
/// The reactor relies on that property: a registration may be removed
/// by a callback while readiness for its old token is still queued in
/// the current poll batch, and the stale token must miss.
pub(crate) struct Slab<T> {
    /// Slot storage; `value` is `None` while the slot is free.
    slots: Vec<Slot<T>>,
    /// Stack of free slot indices available for reuse.
    free: Vec<usize>,
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Packs a slot index and its generation into one token.
fn pack(index: usize, generation: u32) -> u64 {
    (u64::from(generation) << 32) | index as u64
}

/// Splits a token back into its slot index and generation.
fn unpack(token: u64) -> (usize, u32) {
    ((token & u64::from(u32::MAX)) as usize, (token >> 32) as u32)
}

impl<T> Slab<T> {
    /// Creates an empty `Slab`.
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Inserts a value and returns its token.
    ///
    /// A free slot is reused when available; otherwise the slab grows.
    pub(crate) fn insert(&mut self, value: T) -> u64 {
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index].value = Some(value);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    value: Some(value),
                });
                self.slots.len() - 1
            }
        };

        pack(index, self.slots[index].generation)
    }

    /// Returns a reference to the value behind `token`.
    ///
    /// Returns `None` for tokens whose value was removed, even if the
    /// slot has since been reoccupied.
    pub(crate) fn get(&self, token: u64) -> Option<&T> {
        let (index, generation) = unpack(token);
        let slot = self.slots.get(index)?;

        if slot.generation != generation {
            return None;
        }

        slot.value.as_ref()
    }

    /// Removes and returns the value behind `token`.
    ///
    /// The slot's generation is bumped so the token (and any copy of
    /// it) becomes permanently stale. Removing an already stale token
    /// is a no-op returning `None`.
    pub(crate) fn remove(&mut self, token: u64) -> Option<T> {
        let (index, generation) = unpack(token);
        let slot = self.slots.get_mut(index)?;

        if slot.generation != generation || slot.value.is_none() {
            return None;
        }

        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);

        slot.value.take()
    }

    /// Iterates over all live entries as `(token, value)` pairs.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (u64, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (pack(index, slot.generation), value))
        })
    }
}

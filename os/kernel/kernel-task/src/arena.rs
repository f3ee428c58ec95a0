//! Generation-checked slot arena.
//!
//! Slots are reused after removal; each reuse bumps the slot generation so
//! a stale [`Handle`] no longer resolves.

use alloc::vec::Vec;

/// Key into an [`Arena`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Make sure the next [`insert`](Self::insert) does not allocate.
    ///
    /// Returns `false` if the backing storage could not grow.
    pub fn reserve_one(&mut self) -> bool {
        self.free_head.is_some() || self.slots.try_reserve(1).is_ok()
    }

    /// Store `value`, or hand it back if no storage is left.
    ///
    /// # Errors
    /// Returns `value` if growing the backing storage failed.
    pub fn insert(&mut self, value: T) -> Result<Handle, T> {
        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            let Slot::Vacant { generation, next_free } = *slot else {
                unreachable!("free list points at an occupied slot");
            };
            let generation = generation.wrapping_add(1);
            self.free_head = next_free;
            *slot = Slot::Occupied { generation, value };
            self.len += 1;
            return Ok(Handle { index, generation });
        }

        let Ok(index) = u32::try_from(self.slots.len()) else {
            return Err(value);
        };
        if self.slots.try_reserve(1).is_err() {
            return Err(value);
        }
        self.slots.push(Slot::Occupied {
            generation: 0,
            value,
        });
        self.len += 1;
        Ok(Handle {
            index,
            generation: 0,
        })
    }

    /// Take the value out; the handle and all copies of it go stale.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == handle.generation => {}
            _ => return None,
        }
        let vacant = Slot::Vacant {
            generation: handle.generation,
            next_free: self.free_head,
        };
        let Slot::Occupied { value, .. } = core::mem::replace(slot, vacant) else {
            return None;
        };
        self.free_head = Some(handle.index);
        self.len -= 1;
        Some(value)
    }

    #[must_use]
    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    #[must_use]
    pub fn get(&self, handle: Handle) -> Option<&T> {
        match self.slots.get(handle.index as usize)? {
            Slot::Occupied { generation, value } if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        match self.slots.get_mut(handle.index as usize)? {
            Slot::Occupied { generation, value } if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    /// Live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> + '_ {
        self.slots.iter().zip(0u32..).filter_map(|(slot, index)| match slot {
            Slot::Occupied { generation, value } => Some((
                Handle {
                    index,
                    generation: *generation,
                },
                value,
            )),
            Slot::Vacant { .. } => None,
        })
    }
}

//! Fixed-capacity slot arenas addressed by generation-checked handles.

/// Index plus the generation the slot had when it was handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle {
    index: u32,
    generation: u32,
}

impl RawHandle {
    pub const INVALID: RawHandle = RawHandle {
        index: u32::MAX,
        generation: 0,
    };

    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

macro_rules! slot_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub(crate) RawHandle);

        impl $name {
            /// A handle that never refers to a live slot
            pub const INVALID: $name = $name(RawHandle::INVALID);

            pub fn index(&self) -> usize {
                self.0.index()
            }
        }
    };
}

slot_handle!(
    /// Handle to a 2D sample slot
    SampleHandle
);
slot_handle!(
    /// Handle to a positional sample slot
    Sample3dHandle
);
slot_handle!(
    /// Handle to a stream slot
    StreamHandle
);
slot_handle!(
    /// Handle to a registered timer
    TimerHandle
);

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Fixed array of slots; allocation takes the first free one.
pub struct SlotPool<T> {
    slots: Vec<Slot<T>>,
}

impl<T> SlotPool<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                value: None,
            })
            .collect();
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|slot| slot.value.is_some()).count()
    }

    /// Index of the first free slot, if any
    pub fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(|slot| slot.value.is_none())
    }

    /// Fill a free slot found by [`first_free`](Self::first_free).
    ///
    /// Returns `None` if the slot is out of range or already occupied.
    pub fn occupy(&mut self, index: usize, value: T) -> Option<RawHandle> {
        let slot = self.slots.get_mut(index)?;
        if slot.value.is_some() {
            return None;
        }
        slot.value = Some(value);
        Some(RawHandle {
            index: index as u32,
            generation: slot.generation,
        })
    }

    pub fn insert(&mut self, value: T) -> Option<RawHandle> {
        let index = self.first_free()?;
        self.occupy(index, value)
    }

    pub fn get(&self, handle: RawHandle) -> Option<&T> {
        let slot = self.slots.get(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, handle: RawHandle) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Empty the slot and bump its generation so old handles go stale.
    pub fn remove(&mut self, handle: RawHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        Some(value)
    }

    /// Handles of every occupied slot
    pub fn handles(&self) -> Vec<RawHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.value.is_some())
            .map(|(index, slot)| RawHandle {
                index: index as u32,
                generation: slot.generation,
            })
            .collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(|slot| slot.value.as_mut())
    }
}

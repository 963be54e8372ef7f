use super::FrameSlot;

/// Index of an arena slot plus the generation that was stored there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug, Default)]
struct Entry {
    generation: u32,
    slot: Option<FrameSlot>,
}

/// Slots reused through a free list. Stale handles resolve to `None`.
#[derive(Debug, Default)]
pub(super) struct FrameArena {
    entries: Vec<Entry>,
    free: Vec<u32>,
}

impl FrameArena {
    pub fn insert(&mut self, slot: FrameSlot) -> SlotHandle {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.entries.push(Entry::default());
                (self.entries.len() - 1) as u32
            }
        };
        let entry = &mut self.entries[index as usize];
        debug_assert!(entry.slot.is_none());
        entry.slot = Some(slot);
        SlotHandle {
            index,
            generation: entry.generation,
        }
    }

    pub fn remove(&mut self, handle: SlotHandle) -> Option<FrameSlot> {
        let entry = self.entries.get_mut(handle.index as usize)?;
        if entry.generation != handle.generation {
            return None;
        }
        let slot = entry.slot.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(handle.index);
        Some(slot)
    }

    pub fn get(&self, handle: SlotHandle) -> Option<&FrameSlot> {
        self.entries
            .get(handle.index as usize)
            .filter(|entry| entry.generation == handle.generation)
            .and_then(|entry| entry.slot.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len() - self.free.len()
    }
}

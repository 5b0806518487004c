//! Arena-backed doubly linked list used for cache ordering.
//!
//! Slots live in a `Vec` and link to each other by index, so there are no
//! ownership cycles. Freed indices are recycled. `head` is the most recently
//! favoured slot and `tail` is the next eviction candidate for FIFO and LRU.

/// Index of a slot inside the arena.
pub(crate) type SlotId = usize;

#[derive(Debug)]
pub(crate) struct Slot {
    pub key: String,
    pub value: String,
    pub owner: String,
    /// LFU access counter.
    pub hits: u64,
    /// LFU logical timestamp (tie-break only).
    pub stamp: u64,
    prev: Option<SlotId>,
    next: Option<SlotId>,
}

impl Slot {
    pub fn new(key: String, value: String, owner: String, stamp: u64) -> Self {
        Self {
            key,
            value,
            owner,
            hits: 0,
            stamp,
            prev: None,
            next: None,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct SlotList {
    slots: Vec<Option<Slot>>,
    free: Vec<SlotId>,
    head: Option<SlotId>,
    tail: Option<SlotId>,
    len: usize,
}

impl SlotList {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn tail(&self) -> Option<SlotId> {
        self.tail
    }

    pub fn get(&self, id: SlotId) -> Option<&Slot> {
        self.slots.get(id).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut Slot> {
        self.slots.get_mut(id).and_then(Option::as_mut)
    }

    /// Iterate live slots with their ids, in arena order (not list order).
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &Slot)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, s)| s.as_ref().map(|s| (id, s)))
    }

    /// Store a slot and link it at the head.
    pub fn push_head(&mut self, slot: Slot) -> SlotId {
        let id = match self.free.pop() {
            Some(id) => {
                self.slots[id] = Some(slot);
                id
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.link_head(id);
        self.len += 1;
        id
    }

    /// Unlink and free a slot, returning its contents.
    pub fn remove(&mut self, id: SlotId) -> Option<Slot> {
        if self.get(id).is_none() {
            return None;
        }
        self.unlink(id);
        let slot = self.slots[id].take();
        self.free.push(id);
        self.len -= 1;
        slot
    }

    /// Move a live slot to the head.
    pub fn move_to_head(&mut self, id: SlotId) {
        if self.head == Some(id) || self.get(id).is_none() {
            return;
        }
        self.unlink(id);
        self.link_head(id);
    }

    fn link_head(&mut self, id: SlotId) {
        let old_head = self.head;
        if let Some(slot) = self.get_mut(id) {
            slot.prev = None;
            slot.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(slot) = self.get_mut(h) {
                slot.prev = Some(id);
            }
        }
        self.head = Some(id);
        if self.tail.is_none() {
            self.tail = Some(id);
        }
    }

    fn unlink(&mut self, id: SlotId) {
        let (prev, next) = match self.get(id) {
            Some(slot) => (slot.prev, slot.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(slot) = self.get_mut(p) {
                    slot.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(slot) = self.get_mut(n) {
                    slot.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(slot) = self.get_mut(id) {
            slot.prev = None;
            slot.next = None;
        }
    }

    /// Keys from head to tail.
    #[cfg(test)]
    pub fn keys_in_order(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.len);
        let mut cur = self.head;
        while let Some(id) = cur {
            let Some(slot) = self.get(id) else { break };
            out.push(slot.key.clone());
            cur = slot.next;
        }
        out
    }
}

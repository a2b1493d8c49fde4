//! # Pending-Request Table
//!
//! A fixed power-of-two, open-addressed hash table mapping in-flight
//! request ids to their waiters. Linear probing with tombstones: a lookup
//! probes through tombstones and stops at the first truly empty slot,
//! while an insert may reuse the first tombstone it saw. The table grows
//! (doubling) when the load factor after an insertion would reach 0.75.
//!
//! The table itself is lock-free of locking concerns: the owning client
//! engine wraps it in a single mutex which also covers every reader-task
//! access. Entries move by value during growth; the waiter's wake-up
//! channel is untouched because the entry only holds the sender half as
//! an owned handle.
//!
//! Slot encoding: id 0 with state `Empty` is a never-used slot; id 0 with
//! state `Invalidated` is a tombstone. Live entries always have a
//! non-zero id (id 0 is reserved for the liveness probe and never enters
//! the table).

use serde_json::value::RawValue;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::defaults;

/// Lifecycle state of one table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryState {
    /// Never-used slot; terminates probe sequences.
    Empty,
    /// A caller is blocked on this entry's signal.
    Waiting,
    /// The reader delivered a result; the waiter has yet to collect it.
    Completed,
    /// The reader delivered an error; the waiter has yet to collect it.
    Errored,
    /// The waiter gave up; a late response must be dropped.
    TimedOut,
    /// Tombstone; probing continues through it.
    Invalidated,
}

/// Error stored in a slot by the reader or the failure fan-out.
#[derive(Debug, Clone)]
pub(crate) enum PendingError {
    /// The backend answered with a JSON-RPC error object.
    Protocol { code: i32, message: String },
    /// The connection failed before an answer arrived.
    Transport { code: i32, message: String },
}

#[derive(Debug, Error)]
pub(crate) enum InsertError {
    #[error("duplicate request id {0}")]
    DuplicateId(u64),
    #[error("pending table allocation failed")]
    OutOfMemory,
}

/// Outcome slots moved out of the table when an entry is removed.
#[derive(Debug)]
pub(crate) struct RemovedEntry {
    pub(crate) state: EntryState,
    pub(crate) result: Option<Box<RawValue>>,
    pub(crate) error: Option<PendingError>,
}

#[derive(Debug)]
struct Slot {
    id: u64,
    state: EntryState,
    signal: Option<oneshot::Sender<()>>,
    result: Option<Box<RawValue>>,
    error: Option<PendingError>,
}

impl Slot {
    fn empty() -> Self {
        Self {
            id: 0,
            state: EntryState::Empty,
            signal: None,
            result: None,
            error: None,
        }
    }

    fn is_live(&self) -> bool {
        !matches!(self.state, EntryState::Empty | EntryState::Invalidated)
    }

    fn is_tombstone(&self) -> bool {
        self.state == EntryState::Invalidated
    }
}

#[derive(Debug)]
pub(crate) struct PendingTable {
    slots: Vec<Slot>,
    live: usize,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::with_capacity(defaults::INITIAL_TABLE_CAPACITY)
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.next_power_of_two().max(2);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::empty);
        Self { slots, live: 0 }
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[cfg(test)]
    pub(crate) fn waiting_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == EntryState::Waiting)
            .count()
    }

    fn home(&self, id: u64) -> usize {
        (id as usize) & (self.slots.len() - 1)
    }

    fn find_index(&self, id: u64) -> Option<usize> {
        let cap = self.slots.len();
        let mut i = self.home(id);
        for _ in 0..cap {
            let slot = &self.slots[i];
            if slot.state == EntryState::Empty {
                return None;
            }
            // Tombstones do not terminate probing.
            if !slot.is_tombstone() && slot.id == id {
                return Some(i);
            }
            i = (i + 1) & (cap - 1);
        }
        None
    }

    /// Register a waiter under `id`.
    ///
    /// Grows the table first if the post-insert load factor would reach
    /// 0.75, so a registered signal handle never has to survive more than
    /// one relocation per insert.
    pub(crate) fn insert(
        &mut self,
        id: u64,
        signal: oneshot::Sender<()>,
    ) -> Result<(), InsertError> {
        if (self.live + 1) * 4 >= self.slots.len() * 3 {
            self.grow()?;
        }

        let cap = self.slots.len();
        let mut i = self.home(id);
        let mut reusable = None;
        let mut target = None;
        for _ in 0..cap {
            let slot = &self.slots[i];
            if slot.state == EntryState::Empty {
                target = Some(reusable.unwrap_or(i));
                break;
            }
            if slot.is_tombstone() {
                if reusable.is_none() {
                    reusable = Some(i);
                }
            } else if slot.id == id {
                return Err(InsertError::DuplicateId(id));
            }
            i = (i + 1) & (cap - 1);
        }

        let index = match target.or(reusable) {
            Some(index) => index,
            // Unreachable while growth keeps live below capacity.
            None => return Err(InsertError::OutOfMemory),
        };
        self.slots[index] = Slot {
            id,
            state: EntryState::Waiting,
            signal: Some(signal),
            result: None,
            error: None,
        };
        self.live += 1;
        Ok(())
    }

    /// Deliver a result to a Waiting entry. Returns false when the entry
    /// is absent or no longer Waiting (the response must be dropped).
    pub(crate) fn complete(&mut self, id: u64, result: Box<RawValue>) -> bool {
        match self.find_index(id) {
            Some(i) if self.slots[i].state == EntryState::Waiting => {
                let slot = &mut self.slots[i];
                slot.result = Some(result);
                slot.state = EntryState::Completed;
                if let Some(signal) = slot.signal.take() {
                    let _ = signal.send(());
                }
                true
            }
            _ => false,
        }
    }

    /// Deliver an error to a Waiting entry. Same drop semantics as
    /// [`complete`](Self::complete).
    pub(crate) fn fail(&mut self, id: u64, error: PendingError) -> bool {
        match self.find_index(id) {
            Some(i) if self.slots[i].state == EntryState::Waiting => {
                let slot = &mut self.slots[i];
                slot.error = Some(error);
                slot.state = EntryState::Errored;
                if let Some(signal) = slot.signal.take() {
                    let _ = signal.send(());
                }
                true
            }
            _ => false,
        }
    }

    /// Fan a transport failure out to every Waiting entry.
    ///
    /// Each waiter observes state `Errored` with the given code and
    /// message. Returns the number of entries signalled.
    pub(crate) fn drain_waiting(&mut self, code: i32, message: &str) -> usize {
        let mut drained = 0;
        for slot in &mut self.slots {
            if slot.state == EntryState::Waiting {
                slot.error = Some(PendingError::Transport {
                    code,
                    message: message.to_string(),
                });
                slot.state = EntryState::Errored;
                if let Some(signal) = slot.signal.take() {
                    let _ = signal.send(());
                }
                drained += 1;
            }
        }
        drained
    }

    /// Transition a Waiting entry to TimedOut, dropping its signal.
    /// Returns false if the entry already holds an outcome.
    pub(crate) fn mark_timed_out(&mut self, id: u64) -> bool {
        match self.find_index(id) {
            Some(i) if self.slots[i].state == EntryState::Waiting => {
                let slot = &mut self.slots[i];
                slot.state = EntryState::TimedOut;
                slot.signal = None;
                true
            }
            _ => false,
        }
    }

    /// Remove an entry, leaving a tombstone, and hand its outcome slots
    /// to the caller. Only the waiting side removes entries.
    pub(crate) fn remove(&mut self, id: u64) -> Option<RemovedEntry> {
        let i = self.find_index(id)?;
        let slot = &mut self.slots[i];
        let removed = RemovedEntry {
            state: slot.state,
            result: slot.result.take(),
            error: slot.error.take(),
        };
        slot.id = 0;
        slot.state = EntryState::Invalidated;
        slot.signal = None;
        self.live -= 1;
        Some(removed)
    }

    /// Destroy-time sweep: tombstone every live entry and drop its
    /// signal. Blocked waiters observe their channel closing.
    pub(crate) fn invalidate_all(&mut self) {
        for slot in &mut self.slots {
            if slot.is_live() {
                slot.id = 0;
                slot.state = EntryState::Invalidated;
                slot.signal = None;
                slot.result = None;
                slot.error = None;
            }
        }
        self.live = 0;
    }

    fn grow(&mut self) -> Result<(), InsertError> {
        let new_cap = self.slots.len() * 2;
        let mut new_slots = Vec::new();
        new_slots
            .try_reserve_exact(new_cap)
            .map_err(|_| InsertError::OutOfMemory)?;
        new_slots.resize_with(new_cap, Slot::empty);

        let old = std::mem::replace(&mut self.slots, new_slots);
        self.live = 0;
        for slot in old {
            if slot.is_live() {
                self.reinsert(slot);
            }
        }
        Ok(())
    }

    // Capacity is guaranteed sufficient after grow; tombstones never
    // carry over, so probing only has to find an Empty slot.
    fn reinsert(&mut self, slot: Slot) {
        let cap = self.slots.len();
        let mut i = (slot.id as usize) & (cap - 1);
        loop {
            if self.slots[i].state == EntryState::Empty {
                self.slots[i] = slot;
                self.live += 1;
                return;
            }
            i = (i + 1) & (cap - 1);
        }
    }
}

//! Per-thread flag arrays written during a launch and scanned afterwards.
//!
//! A kernel marks "this thread produced a message" or "this agent died" by
//! setting its slot; the host later counts or compacts the set slots.

use std::sync::atomic::{AtomicU32, Ordering};

/// One `u32` flag per thread.
#[derive(Debug, Default)]
pub struct ScanFlags {
    flags: Box<[AtomicU32]>,
}

impl ScanFlags {
    /// Creates `len` cleared flags.
    pub fn new(len: u32) -> Self {
        Self {
            flags: (0..len).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    pub fn len(&self) -> u32 {
        self.flags.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Grows to at least `len` flags. Existing flags are cleared.
    pub fn resize(&mut self, len: u32) {
        if len > self.len() {
            *self = Self::new(len);
        } else {
            self.zero();
        }
    }

    /// Clears every flag.
    pub fn zero(&self) {
        for flag in self.flags.iter() {
            flag.store(0, Ordering::Relaxed);
        }
    }

    /// Device side: sets the flag of `index`. Out-of-range indices are ignored.
    pub fn set(&self, index: u32) {
        if let Some(flag) = self.flags.get(index as usize) {
            flag.store(1, Ordering::Relaxed);
        }
    }

    /// Device side: clears the flag of `index`.
    pub fn clear(&self, index: u32) {
        if let Some(flag) = self.flags.get(index as usize) {
            flag.store(0, Ordering::Relaxed);
        }
    }

    /// Device side: increments the flag of `index` and returns its previous value.
    ///
    /// The caller seeing 0 is the first claimant. Out-of-range indices return `None`.
    pub fn claim(&self, index: u32) -> Option<u32> {
        self.flags
            .get(index as usize)
            .map(|f| f.fetch_add(1, Ordering::AcqRel))
    }

    /// Raw value of the flag of `index` (the claim count after [`Self::claim`]).
    pub fn value(&self, index: u32) -> u32 {
        self.flags
            .get(index as usize)
            .map_or(0, |f| f.load(Ordering::Relaxed))
    }

    pub fn is_set(&self, index: u32) -> bool {
        self.flags
            .get(index as usize)
            .is_some_and(|f| f.load(Ordering::Relaxed) != 0)
    }

    /// Number of set flags.
    pub fn count(&self) -> u32 {
        self.flags
            .iter()
            .filter(|f| f.load(Ordering::Relaxed) != 0)
            .count() as u32
    }

    /// Indices of the set flags, ascending.
    pub fn set_indices(&self) -> Vec<u32> {
        self.flags
            .iter()
            .enumerate()
            .filter(|(_, f)| f.load(Ordering::Relaxed) != 0)
            .map(|(i, _)| i as u32)
            .collect()
    }
}

/// The flag arrays of one agent function launch.
#[derive(Debug, Default)]
pub struct ScanCompaction {
    /// Thread wrote a message
    pub message_output: ScanFlags,
    /// Thread created a new agent
    pub agent_output: ScanFlags,
    /// Agent died during the function
    pub agent_death: ScanFlags,
    /// Agent passed its function condition
    pub condition: ScanFlags,
}

impl ScanCompaction {
    pub fn new(len: u32) -> Self {
        Self {
            message_output: ScanFlags::new(len),
            agent_output: ScanFlags::new(len),
            agent_death: ScanFlags::new(len),
            condition: ScanFlags::new(len),
        }
    }

    /// Grows every array to at least `len` and clears them.
    pub fn resize(&mut self, len: u32) {
        self.message_output.resize(len);
        self.agent_output.resize(len);
        self.agent_death.resize(len);
        self.condition.resize(len);
    }

    pub fn zero_all(&self) {
        self.message_output.zero();
        self.agent_output.zero();
        self.agent_death.zero();
        self.condition.zero();
    }
}

/// Source of fresh agent ids.
///
/// Ids start at 1; 0 is the "not set" value.
#[derive(Debug)]
pub struct IdCounter {
    next: AtomicU32,
}

impl IdCounter {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Continues numbering after ids that already exist.
    pub fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first.max(1)),
        }
    }

    /// Device side: takes the next id. Unique across threads.
    pub fn next(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The id the next call would return.
    pub fn peek(&self) -> u32 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for IdCounter {
    fn default() -> Self {
        Self::new()
    }
}

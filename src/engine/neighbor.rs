//! Per-peer generation and sequence bookkeeping.

use tracing::debug;

use crate::core::{LinkAddr, NeighborError, MAX_SEQNO};
use crate::util::Arena;

/// Which of a neighbor's two generation counters to advance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationKind {
    /// GTX, the generation of cells we transmit on
    Tx,
    /// GRX, the generation of cells we receive on
    Rx,
}

/// Returns the successor of a generation counter value
///
/// The counter walks 0 -> 1 -> 2 -> 1 -> 2 ...; 0 is only seen before the
/// first schedule change with the peer.
pub fn next_generation(current: u8) -> Result<u8, NeighborError> {
    match current {
        0 | 2 => Ok(1),
        1 => Ok(2),
        other => Err(NeighborError::InvalidGeneration(other)),
    }
}

/// Advances a generation counter in place
pub fn advance_generation(counter: &mut u8) -> Result<(), NeighborError> {
    *counter = next_generation(*counter)?;
    Ok(())
}

/// Negotiation state kept for one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborRecord {
    pub addr: LinkAddr,
    seqno: u8,
    pub gtx: u8,
    pub grx: u8,
}

impl NeighborRecord {
    fn new(addr: LinkAddr, initial_seqno: u8) -> Self {
        NeighborRecord {
            addr,
            seqno: initial_seqno & MAX_SEQNO,
            gtx: 0,
            grx: 0,
        }
    }

    /// Sequence number the next Request to this peer will carry
    pub fn next_seqno(&self) -> u8 {
        self.seqno
    }

    /// Moves to the following sequence number, wrapping 15 -> 0
    pub fn increment_seqno(&mut self) {
        self.seqno = if self.seqno >= MAX_SEQNO { 0 } else { self.seqno + 1 };
    }

    /// Advances the selected generation counter
    pub fn advance(&mut self, kind: GenerationKind) -> Result<(), NeighborError> {
        match kind {
            GenerationKind::Tx => advance_generation(&mut self.gtx),
            GenerationKind::Rx => advance_generation(&mut self.grx),
        }
    }
}

/// Bounded table of [`NeighborRecord`]s keyed by link address
#[derive(Debug)]
pub struct NeighborStore {
    records: Arena<NeighborRecord>,
    initial_seqno: u8,
}

impl NeighborStore {
    pub fn new(capacity: usize, initial_seqno: u8) -> Self {
        NeighborStore {
            records: Arena::with_capacity(capacity),
            initial_seqno,
        }
    }

    pub fn find(&self, addr: &LinkAddr) -> Option<&NeighborRecord> {
        let handle = self.records.find(|n| n.addr == *addr)?;
        self.records.get(handle)
    }

    pub fn find_mut(&mut self, addr: &LinkAddr) -> Option<&mut NeighborRecord> {
        let handle = self.records.find(|n| n.addr == *addr)?;
        self.records.get_mut(handle)
    }

    /// Creates a record for a peer that has none yet
    pub fn alloc(&mut self, addr: LinkAddr) -> Result<&mut NeighborRecord, NeighborError> {
        if self.find(&addr).is_some() {
            return Err(NeighborError::Duplicate);
        }
        let handle = self
            .records
            .insert(NeighborRecord::new(addr, self.initial_seqno))
            .map_err(|_| NeighborError::NoMemory)?;
        debug!(peer = %addr, "neighbor allocated");
        self.records.get_mut(handle).ok_or(NeighborError::NoMemory)
    }

    /// Returns the peer's record, creating it if needed
    pub fn find_or_alloc(&mut self, addr: LinkAddr) -> Result<&mut NeighborRecord, NeighborError> {
        match self.records.find(|n| n.addr == addr) {
            Some(handle) => self.records.get_mut(handle).ok_or(NeighborError::NoMemory),
            None => self.alloc(addr),
        }
    }

    /// Removes a peer's record; returns whether one existed
    pub fn free(&mut self, addr: &LinkAddr) -> bool {
        match self.records.find(|n| n.addr == *addr) {
            Some(handle) => {
                self.records.remove(handle);
                debug!(peer = %addr, "neighbor freed");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.is_full()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

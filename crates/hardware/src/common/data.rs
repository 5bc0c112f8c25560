//! Memory request packets and line payloads.
//!
//! This module defines the data that flows through the memory controller:
//! 1. **Access classification:** read vs. write demand traffic.
//! 2. **Packets:** one per demand request, carrying the physical address, the
//!    translated hardware addresses, and a 64-bit data token.
//! 3. **Lines:** full 64-byte payloads moved by the swapping unit and held in
//!    the tier back-ends' sparse stores.

use super::addr::{HwAddr, PhysAddr};
use super::constants::LINE_BYTES;

/// Type of demand memory access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessKind {
    /// Data read (load or fetch miss reaching memory).
    Read,
    /// Data write (dirty write-back reaching memory).
    Write,
}

/// A 64-byte cache-line payload.
///
/// Demand packets only carry a 64-bit token; the full line body exists so
/// the swapping unit and the back-end stores move whole lines, keeping the
/// token in the first eight bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Line(pub [u8; LINE_BYTES as usize]);

impl Default for Line {
    fn default() -> Self {
        Self([0; LINE_BYTES as usize])
    }
}

impl Line {
    /// Builds a line whose first eight bytes hold `word` (little-endian).
    pub fn from_word(word: u64) -> Self {
        let mut bytes = [0u8; LINE_BYTES as usize];
        bytes[..8].copy_from_slice(&word.to_le_bytes());
        Self(bytes)
    }

    /// Returns the 64-bit token stored in the first eight bytes.
    pub fn word(&self) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(bytes)
    }

    /// Overwrites the 64-bit token, preserving the rest of the line.
    pub fn set_word(&mut self, word: u64) {
        self.0[..8].copy_from_slice(&word.to_le_bytes());
    }
}

/// A demand memory request as seen by the memory controller.
///
/// The physical address is filled by the upstream cache; the hardware
/// addresses are filled by the address translator before routing.
#[derive(Clone, Copy, Debug)]
pub struct Packet {
    /// Physical address, stable for the lifetime of the request.
    pub addr: PhysAddr,
    /// Translated hardware address; where the datum currently lives.
    pub h_addr: HwAddr,
    /// Fast-tier address of the co-located metadata entry for this line,
    /// when the active policy keeps its tables in fast memory.
    pub h_addr_meta: Option<HwAddr>,
    /// 64-bit data token (the line payload as the caches see it).
    pub data: u64,
    /// Read or write.
    pub kind: AccessKind,
    /// Issuing CPU index.
    pub cpu: usize,
    /// Upstream request id, echoed back on completion.
    pub id: u64,
}

impl Packet {
    /// Creates a demand packet with untranslated hardware address.
    pub fn new(addr: PhysAddr, kind: AccessKind, cpu: usize, id: u64) -> Self {
        Self {
            addr,
            h_addr: HwAddr(addr.0),
            h_addr_meta: None,
            data: 0,
            kind,
            cpu,
            id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_word_round_trip() {
        let mut line = Line::from_word(0xDEAD_BEEF_0123_4567);
        assert_eq!(line.word(), 0xDEAD_BEEF_0123_4567);
        line.set_word(42);
        assert_eq!(line.word(), 42);
        assert_eq!(line.0[8..], [0u8; 56]);
    }
}

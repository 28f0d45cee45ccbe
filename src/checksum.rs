// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Sum-to-zero checksums used by every on-disk structure.

use byteorder::{ByteOrder, LittleEndian};

/// Wrapping sum of little-endian 16-bit words. A trailing odd byte is
/// treated as the low half of a word.
pub fn sum16(bytes: &[u8]) -> u16 {
    let mut sum = 0u16;
    let mut words = bytes.chunks_exact(2);
    for w in &mut words {
        sum = sum.wrapping_add(LittleEndian::read_u16(w));
    }
    if let [last] = words.remainder() {
        sum = sum.wrapping_add(*last as u16);
    }
    sum
}

/// Wrapping sum of little-endian 32-bit words (Checksum32).
pub fn sum32(bytes: &[u8]) -> u32 {
    let mut sum = 0u32;
    let mut quads = bytes.chunks_exact(4);
    for q in &mut quads {
        sum = sum.wrapping_add(LittleEndian::read_u32(q));
    }
    let mut tail = [0u8; 4];
    let rem = quads.remainder();
    tail[..rem.len()].copy_from_slice(rem);
    sum.wrapping_add(LittleEndian::read_u32(&tail))
}

/// Wrapping 32-bit sum of individual bytes (image checksum).
pub fn byte_sum32(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, b| acc.wrapping_add(*b as u32))
}

/// Running 16-bit word sum over bytes placed at arbitrary sector offsets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WordSum(u16);

impl WordSum {
    pub fn new() -> Self {
        Self(0)
    }

    /// Account for `bytes` written starting at sector offset `offset`.
    pub fn add_at(&mut self, offset: usize, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            let v = if (offset + i) & 1 == 0 {
                *b as u16
            } else {
                (*b as u16) << 8
            };
            self.0 = self.0.wrapping_add(v);
        }
    }

    pub fn value(&self) -> u16 {
        self.0
    }

    /// Value that makes the whole covered region sum to zero.
    pub fn complement(&self) -> u16 {
        0u16.wrapping_sub(self.0)
    }
}

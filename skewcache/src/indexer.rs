use sha2::{Digest, Sha256};
use crate::error::{Error, Result};

/// Widest supported row index, 2^24 rows per way is already far beyond any real TLB
pub const MAX_IDX_WIDTH: u32 = 24;

/// Maps an address to one candidate row per way
///
/// Every way gets its own row, computed by hashing the address together with the way number. Two
/// addresses which share a row in one way are no more likely to share a row in any other way,
/// which is what makes the cache skewed.
///
/// The indexer is stateless, so repeated calls always return the same rows regardless of what the
/// cache currently holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressIndexer {
    ways: usize,
    idx_mask: u64,
}

impl AddressIndexer {
    /// Fails with [`Error::InvalidGeometry`] for zero ways or an index wider than
    /// [`MAX_IDX_WIDTH`] bits
    pub fn new(ways: usize, idx_width: u32) -> Result<Self> {
        if ways == 0 || idx_width > MAX_IDX_WIDTH {
            return Err(Error::InvalidGeometry { ways, idx_width });
        }
        Ok(Self {
            ways,
            idx_mask: (1u64 << idx_width) - 1,
        })
    }

    /// Computes the row of `address` in a single way
    ///
    /// The hash input is the decimal address followed by the decimal way number, the low
    /// `idx_width` bits of the digest select the row
    ///
    /// # Arguments
    ///
    /// * `address`: The address being placed
    /// * `way`: The way to compute the row for, must be less than the way count
    ///
    /// returns: u64
    pub fn row(&self, address: u64, way: usize) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(address.to_string().as_bytes());
        hasher.update(way.to_string().as_bytes());
        let digest = hasher.finalize();
        let mut tail = [0u8; 8];
        tail.copy_from_slice(&digest[digest.len() - 8..]);
        u64::from_be_bytes(tail) & self.idx_mask
    }

    /// Computes the candidate row of `address` in every way, ordered by way
    pub fn candidate_rows(&self, address: u64) -> Vec<u64> {
        (0..self.ways).map(|way| self.row(address, way)).collect()
    }

    pub fn ways(&self) -> usize {
        self.ways
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_in_range() {
        let indexer = AddressIndexer::new(8, 3).unwrap();
        for address in [0, 1, 42, u64::MAX, 0xdead_beef] {
            let rows = indexer.candidate_rows(address);
            assert_eq!(rows.len(), 8);
            assert!(rows.iter().all(|r| *r < 8));
        }
    }

    #[test]
    fn rows_are_deterministic() {
        let a = AddressIndexer::new(4, 4).unwrap();
        let b = AddressIndexer::new(4, 4).unwrap();
        assert_eq!(a.candidate_rows(123_456), b.candidate_rows(123_456));
        assert_eq!(a.candidate_rows(123_456), a.candidate_rows(123_456));
    }

    #[test]
    fn zero_width_has_a_single_row() {
        let indexer = AddressIndexer::new(4, 0).unwrap();
        assert_eq!(indexer.candidate_rows(987), vec![0; 4]);
    }

    #[test]
    fn rejects_unusable_widths() {
        assert!(AddressIndexer::new(4, MAX_IDX_WIDTH).is_ok());
        for idx_width in [MAX_IDX_WIDTH + 1, 64, 100] {
            assert!(matches!(
                AddressIndexer::new(4, idx_width),
                Err(Error::InvalidGeometry { ways: 4, idx_width: w }) if w == idx_width
            ));
        }
        assert!(AddressIndexer::new(0, 4).is_err());
    }

    #[test]
    fn ways_are_indexed_independently() {
        // With 16 rows per way, identical rows across all 4 ways for every one of 64 addresses
        // would mean the way number isn't part of the hash
        let indexer = AddressIndexer::new(4, 4).unwrap();
        let skewed = (0..64u64)
            .map(|a| indexer.candidate_rows(a))
            .filter(|rows| rows.iter().any(|r| *r != rows[0]))
            .count();
        assert!(skewed > 0);
    }
}

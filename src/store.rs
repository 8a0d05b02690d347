//! # Holding Register Store
//!
//! The single owner of register storage. One instance lives for the whole
//! process and is shared by handle between the transport, the scheduler and
//! the inspection API; tags only carry addresses into it.
//!
//! Every `get`/`set`/`update` call takes the bank lock once, so a call is
//! atomic with respect to every other caller.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::warn;

use crate::constants::DEFAULT_REGISTER_COUNT;
use crate::error::{PlantError, PlantResult};

/// Shared bank of 16-bit holding registers addressed from 0.
///
/// Cloning is cheap and yields another handle to the same bank.
///
/// # Example
///
/// ```rust
/// use modbus_plant_sim::RegisterStore;
///
/// let store = RegisterStore::new(100);
/// store.set(10, &[1, 2, 3]).unwrap();
/// assert_eq!(store.get(10, 3).unwrap(), vec![1, 2, 3]);
/// ```
#[derive(Debug, Clone)]
pub struct RegisterStore {
    cells: Arc<RwLock<Vec<u16>>>,
}

impl RegisterStore {
    /// Create a zeroed bank of `size` registers.
    pub fn new(size: usize) -> Self {
        Self {
            cells: Arc::new(RwLock::new(vec![0; size])),
        }
    }

    /// Number of registers in the bank.
    pub fn len(&self) -> usize {
        self.cells
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn check(size: usize, address: u16, count: usize) -> PlantResult<std::ops::Range<usize>> {
        let start = usize::from(address);
        let end = start + count;
        if end > size {
            return Err(PlantError::AddressOutOfRange {
                address: u32::from(address),
                count,
                size,
            });
        }
        Ok(start..end)
    }

    /// Read `count` registers starting at `address`.
    pub fn get(&self, address: u16, count: usize) -> PlantResult<Vec<u16>> {
        let cells = self.cells.read().unwrap_or_else(PoisonError::into_inner);
        let range = Self::check(cells.len(), address, count)?;
        Ok(cells[range].to_vec())
    }

    /// Write `values` starting at `address`. Nothing is written when any part
    /// of the range lies outside the bank.
    pub fn set(&self, address: u16, values: &[u16]) -> PlantResult<()> {
        let mut cells = self.cells.write().unwrap_or_else(PoisonError::into_inner);
        let range = Self::check(cells.len(), address, values.len())?;
        cells[range].copy_from_slice(values);
        Ok(())
    }

    /// Read-modify-write of a single register under one lock acquisition.
    /// Returns the new value.
    pub fn update<F>(&self, address: u16, f: F) -> PlantResult<u16>
    where
        F: FnOnce(u16) -> u16,
    {
        let mut cells = self.cells.write().unwrap_or_else(PoisonError::into_inner);
        let range = Self::check(cells.len(), address, 1)?;
        let cell = &mut cells[range.start];
        *cell = f(*cell);
        Ok(*cell)
    }

    // ========================================================================
    // Tag-side access: transport faults never reach the simulation
    // ========================================================================

    /// Read one register for a tag. An unreadable address yields 0.
    #[inline]
    pub fn read(&self, address: u16) -> u16 {
        match self.get(address, 1) {
            Ok(values) => values[0],
            Err(e) => {
                warn!("Tag read fault, using 0: {}", e);
                0
            }
        }
    }

    /// Read two consecutive registers for a tag. An unreadable range yields zeros.
    #[inline]
    pub fn read_pair(&self, address: u16) -> [u16; 2] {
        match self.get(address, 2) {
            Ok(values) => [values[0], values[1]],
            Err(e) => {
                warn!("Tag read fault, using 0: {}", e);
                [0, 0]
            }
        }
    }

    /// Write registers for a tag. Out-of-bank writes are dropped and logged.
    #[inline]
    pub fn write(&self, address: u16, values: &[u16]) {
        if let Err(e) = self.set(address, values) {
            warn!("Tag write dropped: {}", e);
        }
    }
}

impl Default for RegisterStore {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTER_COUNT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set() {
        let store = RegisterStore::new(10);
        assert_eq!(store.len(), 10);
        store.set(8, &[0xAAAA, 0x5555]).unwrap();
        assert_eq!(store.get(7, 3).unwrap(), vec![0, 0xAAAA, 0x5555]);
    }

    #[test]
    fn test_out_of_range_is_rejected_whole() {
        let store = RegisterStore::new(10);
        let err = store.set(9, &[1, 2]).unwrap_err();
        assert!(matches!(
            err,
            PlantError::AddressOutOfRange {
                address: 9,
                count: 2,
                size: 10
            }
        ));
        assert_eq!(store.get(9, 1).unwrap(), vec![0]);
        assert!(store.get(10, 1).is_err());
    }

    #[test]
    fn test_tag_reads_default_to_zero() {
        let store = RegisterStore::new(4);
        store.set(3, &[7]).unwrap();
        assert_eq!(store.read(3), 7);
        assert_eq!(store.read(4), 0);
        assert_eq!(store.read_pair(3), [0, 0]);
        store.write(4, &[1]);
        assert_eq!(store.get(0, 4).unwrap(), vec![0, 0, 0, 7]);
    }

    #[test]
    fn test_update_and_shared_handles() {
        let store = RegisterStore::new(4);
        let other = store.clone();
        assert_eq!(store.update(1, |v| v | 0b100).unwrap(), 0b100);
        assert_eq!(other.read(1), 0b100);
        assert!(store.update(4, |v| v).is_err());
    }

    #[test]
    fn test_default_size() {
        assert_eq!(RegisterStore::default().len(), DEFAULT_REGISTER_COUNT);
    }
}

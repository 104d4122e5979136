use crate::codec::{self, WordPair};
use heapless::FnvIndexMap;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use thiserror::Error;

/// Upper bound on allocated cells. Must stay a power of two for `FnvIndexMap`.
pub const MAX_REGISTERS: usize = 32;

// Default register map (40001–40002 and 40005–40006 in 1-based notation)
pub const REG_VOLTAGE: u16 = 0;
pub const REG_TEMPERATURE: u16 = 4;

const_assert!(MAX_REGISTERS.is_power_of_two());
const_assert!(REG_VOLTAGE + 1 < REG_TEMPERATURE);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("register {0} is not allocated")]
    Unallocated(u16),
    #[error("register bank is full ({MAX_REGISTERS} cells)")]
    BankFull,
    #[error("register range starting at {start} with {count} cells exceeds the address space")]
    OutOfRange { start: u16, count: usize },
}

/// Address of the high cell of a float pair; the low cell follows at `+1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPair(pub u16);

impl RegisterPair {
    pub const fn high(self) -> u16 {
        self.0
    }

    pub const fn low(self) -> u16 {
        self.0.wrapping_add(1)
    }

    pub const fn overlaps(self, other: RegisterPair) -> bool {
        let a = self.0 as u32;
        let b = other.0 as u32;
        a <= b + 1 && b <= a + 1
    }
}

/// Protocol-exposed holding registers.
///
/// Cells must be allocated before they can be read or written, mirroring the
/// way a Modbus slave only answers for registers it has declared. Storage is
/// bounded and never allocates after construction.
#[derive(Debug, Default)]
pub struct RegisterBank {
    cells: FnvIndexMap<u16, u16, MAX_REGISTERS>,
}

impl RegisterBank {
    pub fn new() -> Self {
        Self {
            cells: FnvIndexMap::new(),
        }
    }

    /// Declare a cell, initialised to 0. Re-allocating an existing cell keeps its value.
    pub fn allocate(&mut self, address: u16) -> Result<(), RegisterError> {
        if self.cells.contains_key(&address) {
            return Ok(());
        }
        self.cells
            .insert(address, 0)
            .map(|_| ())
            .map_err(|_| RegisterError::BankFull)
    }

    pub fn allocate_pair(&mut self, pair: RegisterPair) -> Result<(), RegisterError> {
        if pair.high() == u16::MAX {
            return Err(RegisterError::OutOfRange {
                start: pair.high(),
                count: 2,
            });
        }
        self.allocate(pair.high())?;
        self.allocate(pair.low())
    }

    pub fn is_allocated(&self, address: u16) -> bool {
        self.cells.contains_key(&address)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn read(&self, address: u16) -> Result<u16, RegisterError> {
        self.cells
            .get(&address)
            .copied()
            .ok_or(RegisterError::Unallocated(address))
    }

    pub fn write(&mut self, address: u16, value: u16) -> Result<(), RegisterError> {
        match self.cells.get_mut(&address) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(RegisterError::Unallocated(address)),
        }
    }

    /// Check that `count` consecutive cells from `start` are all allocated.
    pub fn check_range(&self, start: u16, count: usize) -> Result<(), RegisterError> {
        if usize::from(start) + count > usize::from(u16::MAX) + 1 {
            return Err(RegisterError::OutOfRange { start, count });
        }
        for offset in 0..count {
            let address = start + offset as u16;
            if !self.is_allocated(address) {
                return Err(RegisterError::Unallocated(address));
            }
        }
        Ok(())
    }

    /// Read `out.len()` consecutive cells starting at `start`.
    pub fn read_range(&self, start: u16, out: &mut [u16]) -> Result<(), RegisterError> {
        self.check_range(start, out.len())?;
        for (offset, slot) in out.iter_mut().enumerate() {
            *slot = self.read(start + offset as u16)?;
        }
        Ok(())
    }

    /// Write consecutive cells. Either every cell is written or none is.
    pub fn write_range(&mut self, start: u16, values: &[u16]) -> Result<(), RegisterError> {
        self.check_range(start, values.len())?;
        for (offset, value) in values.iter().enumerate() {
            self.write(start + offset as u16, *value)?;
        }
        Ok(())
    }

    pub fn read_pair(&self, pair: RegisterPair) -> Result<WordPair, RegisterError> {
        Ok(WordPair::new(self.read(pair.high())?, self.read(pair.low())?))
    }

    pub fn write_pair(&mut self, pair: RegisterPair, words: WordPair) -> Result<(), RegisterError> {
        self.write_range(pair.high(), &words.to_array())
    }

    pub fn read_f32(&self, pair: RegisterPair) -> Result<f32, RegisterError> {
        self.read_pair(pair).map(codec::decode)
    }

    pub fn write_f32(&mut self, pair: RegisterPair, value: f32) -> Result<(), RegisterError> {
        self.write_pair(pair, codec::encode(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unallocated_access_is_rejected() {
        let mut bank = RegisterBank::new();
        assert_eq!(bank.read(3), Err(RegisterError::Unallocated(3)));
        assert_eq!(bank.write(3, 1), Err(RegisterError::Unallocated(3)));
    }

    #[test]
    fn test_write_range_is_all_or_nothing() {
        let mut bank = RegisterBank::new();
        bank.allocate_pair(RegisterPair(0)).unwrap();
        bank.write(0, 7).unwrap();

        // Cell 2 is not allocated, so nothing may change
        assert_eq!(bank.write_range(0, &[1, 2, 3]), Err(RegisterError::Unallocated(2)));
        assert_eq!(bank.read(0), Ok(7));
        assert_eq!(bank.read(1), Ok(0));
    }

    #[test]
    fn test_bank_capacity() {
        let mut bank = RegisterBank::new();
        for address in 0..MAX_REGISTERS as u16 {
            bank.allocate(address).unwrap();
        }
        assert_eq!(bank.allocate(1000), Err(RegisterError::BankFull));
        // Re-allocation of an existing cell is not an insert
        assert!(bank.allocate(0).is_ok());
    }

    #[test]
    fn test_pair_overlap() {
        assert!(RegisterPair(0).overlaps(RegisterPair(1)));
        assert!(RegisterPair(2).overlaps(RegisterPair(1)));
        assert!(!RegisterPair(0).overlaps(RegisterPair(2)));
        assert!(!RegisterPair(4).overlaps(RegisterPair(0)));
    }

    #[test]
    fn test_pair_at_top_of_address_space() {
        let mut bank = RegisterBank::new();
        assert!(matches!(
            bank.allocate_pair(RegisterPair(u16::MAX)),
            Err(RegisterError::OutOfRange { .. })
        ));
    }
}

//! Word-addressed simulated memory.
//!
//! Every address belongs to an allocated region; touching anything else
//! faults. Reading a word through a *take* drains it: the value has moved
//! out, so a second read faults until the word is written again.

use std::collections::BTreeMap;

use rustc_hash::{FxHashMap, FxHashSet};

use relay_abi::WORD_SIZE;

use crate::errors::{EvalError, EvalResult};

#[allow(clippy::cast_lossless, reason = "`u64::from` is not const")]
pub const WORD: u64 = WORD_SIZE as u64;

const BASE_ADDRESS: u64 = 0x1000;

/// Unmapped bytes left between regions so overruns fault.
const GUARD: u64 = 16;

#[derive(Debug)]
pub struct Memory {
    words: FxHashMap<u64, u64>,
    drained: FxHashSet<u64>,
    /// Region base to size in bytes.
    regions: BTreeMap<u64, u32>,
    next: u64,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory {
    pub fn new() -> Self {
        Self {
            words: FxHashMap::default(),
            drained: FxHashSet::default(),
            regions: BTreeMap::new(),
            next: BASE_ADDRESS,
        }
    }

    /// Allocate a zeroed region of at least `bytes` bytes.
    pub fn alloc(&mut self, bytes: u32) -> u64 {
        let base = self.next;
        let size = u64::from(bytes.max(1)).div_ceil(WORD) * WORD;
        self.next = base + size + GUARD;
        self.regions.insert(base, bytes);
        base
    }

    fn check(&self, addr: u64) -> EvalResult<()> {
        match self.regions.range(..=addr).next_back() {
            Some((&base, &bytes)) if addr < base + u64::from(bytes).max(1) => Ok(()),
            _ => Err(EvalError::Unmapped(addr)),
        }
    }

    pub fn read(&self, addr: u64) -> EvalResult<u64> {
        self.check(addr)?;
        if self.drained.contains(&addr) {
            return Err(EvalError::UseAfterTake(addr));
        }
        Ok(self.words.get(&addr).copied().unwrap_or(0))
    }

    pub fn write(&mut self, addr: u64, value: u64) -> EvalResult<()> {
        self.check(addr)?;
        self.drained.remove(&addr);
        self.words.insert(addr, value);
        Ok(())
    }

    /// Read and drain the word at `addr`.
    pub fn take(&mut self, addr: u64) -> EvalResult<u64> {
        let value = self.read(addr)?;
        self.drained.insert(addr);
        Ok(value)
    }

    pub fn is_drained(&self, addr: u64) -> bool {
        self.drained.contains(&addr)
    }

    /// Size in bytes of the region starting exactly at `base`.
    pub fn region_size(&self, base: u64) -> Option<u32> {
        self.regions.get(&base).copied()
    }

    pub fn read_words(&self, addr: u64, count: usize) -> EvalResult<Vec<u64>> {
        (0..count as u64).map(|i| self.read(addr + WORD * i)).collect()
    }

    pub fn write_words(&mut self, addr: u64, values: &[u64]) -> EvalResult<()> {
        for (i, &value) in (0u64..).zip(values) {
            self.write(addr + WORD * i, value)?;
        }
        Ok(())
    }

    pub fn take_words(&mut self, addr: u64, count: usize) -> EvalResult<Vec<u64>> {
        (0..count as u64).map(|i| self.take(addr + WORD * i)).collect()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    reason = "tests use unwrap to panic on unexpected state"
)]

//! Candidate generation for synthetic addresses.
//!
//! A candidate keeps the original address's leading `mask` bits and fills the
//! remaining `W - mask` bits either from a counter shared by every address of
//! the family (sequential) or from fresh random bits (random).

use crate::codec::{bit_mask, prefix_mask};
use crate::error::{AnonymizeError, Result};
use crate::family::AddressFamily;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

/// Counter state of the sequential allocator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorState {
    pub family: AddressFamily,
    pub mask: u32,
    /// Last candidate handed out (or the start value before the first one).
    pub last_value: u128,
    pub started: bool,
}

impl AllocatorState {
    pub fn new(family: AddressFamily, mask: u32, start_value: u128) -> Self {
        Self { family, mask, last_value: start_value, started: false }
    }

    fn tail_width(&self) -> u32 {
        self.family.width() - self.mask
    }

    fn propose(&mut self, original: u128) -> Result<u128> {
        let width = self.family.width();
        let tail_width = self.tail_width();
        let tail_bits = bit_mask(tail_width);
        let tail = self.last_value & tail_bits;

        if tail_width > 0 && tail == tail_bits {
            warn!(family = %self.family, mask = self.mask, "address space exhausted");
            return Err(AnonymizeError::AddressSpaceExhausted { family: self.family, mask: self.mask });
        }

        // with the whole address masked there is no tail to count in
        let tail = if !self.started {
            self.started = true;
            tail
        } else if tail_width > 0 {
            tail + 1
        } else {
            tail
        };

        let candidate = (original & prefix_mask(self.mask, width)) | tail;
        self.last_value = candidate;
        Ok(candidate)
    }
}

pub struct RandomState {
    pub family: AddressFamily,
    pub mask: u32,
    rng: StdRng,
}

impl RandomState {
    /// A `seed` makes the sequence of draws reproducible.
    pub fn new(family: AddressFamily, mask: u32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self { family, mask, rng }
    }

    fn propose(&mut self, original: u128) -> u128 {
        let width = self.family.width();
        let tail = self.rng.gen::<u128>() & bit_mask(width - self.mask);
        (original & prefix_mask(self.mask, width)) | tail
    }
}

impl std::fmt::Debug for RandomState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RandomState").field("family", &self.family).field("mask", &self.mask).finish()
    }
}

#[derive(Debug)]
pub enum Allocator {
    Sequential(AllocatorState),
    Random(RandomState),
}

impl Allocator {
    /// Next candidate for `original`. Sequential state advances even if the
    /// caller later rejects the candidate.
    pub fn propose(&mut self, original: u128) -> Result<u128> {
        match self {
            Allocator::Sequential(state) => state.propose(original),
            Allocator::Random(state) => Ok(state.propose(original)),
        }
    }

    pub fn is_sequential(&self) -> bool {
        matches!(self, Allocator::Sequential(_))
    }

    pub fn mask(&self) -> u32 {
        match self {
            Allocator::Sequential(s) => s.mask,
            Allocator::Random(s) => s.mask,
        }
    }
}

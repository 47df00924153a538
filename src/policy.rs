//! Sampling Eviction Policies
//!
//! Stores in this crate never keep their entries ordered by recency or
//! frequency. When a store is full it draws a small uniform random sample of
//! its population and evicts the worst candidate of that sample according to
//! an [`EvictionPolicy`]. With a sample of [`DEFAULT_SAMPLE_SIZE`] the chosen
//! victim is, with high probability, in the bottom few percent of the whole
//! population, while eviction stays O(sample) instead of O(population).
//!
//! ```text
//!   population (n entries, dense positions 0..n)
//!   ┌───┬───┬───┬───┬───┬───┬───┬───┬───┬───┐
//!   │ a │ b │ c │ d │ e │ f │ g │ h │ i │ j │
//!   └───┴───┴───┴───┴───┴───┴───┴───┴───┴───┘
//!         ▲           ▲       ▲
//!         └── sample of distinct positions (without replacement)
//!
//!   candidate = first sampled entry with the lowest rank,
//!               skipping the entry that was just added
//! ```
//!
//! The "just added" exclusion keeps a cold sample from evicting the entry
//! that is currently being inserted. The only exception is a sample of exactly
//! one entry: the only candidate is returned even if it was just added, which
//! is what a store with room for zero entries needs.

use core::fmt;
use rand::seq::index;
use rand::Rng;

/// Number of entries drawn by the eviction sampler.
pub const DEFAULT_SAMPLE_SIZE: usize = 30;

/// How a store ranks sampled candidates for eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionPolicy {
    /// Least frequently used: lowest hit count.
    Lfu,
    /// Least recently used: oldest last access.
    Lru,
    /// First in, first out: oldest creation.
    Fifo,
}

impl EvictionPolicy {
    /// Short upper-case policy name.
    pub fn name(&self) -> &'static str {
        match self {
            EvictionPolicy::Lfu => "LFU",
            EvictionPolicy::Lru => "LRU",
            EvictionPolicy::Fifo => "FIFO",
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returns the sample size to draw from a population of `population` entries.
#[inline]
pub fn sample_size(population: usize) -> usize {
    population.min(DEFAULT_SAMPLE_SIZE)
}

/// Draws `sample_size(population)` distinct positions uniformly at random.
pub fn sample_positions<R: Rng + ?Sized>(rng: &mut R, population: usize) -> Vec<usize> {
    let amount = sample_size(population);
    if amount == 0 {
        return Vec::new();
    }
    index::sample(rng, population, amount).into_vec()
}

/// Picks the entry with the lowest `rank` from `sample`.
///
/// Entries for which `is_just_added` returns true are skipped unless the
/// sample holds a single entry. Ties keep the first entry encountered.
/// Returns `None` only for an empty sample (or a sample made up entirely of
/// the just-added entry, which cannot happen with distinct positions).
pub fn select_candidate<'a, T, R, J>(sample: &[&'a T], is_just_added: J, rank: R) -> Option<&'a T>
where
    R: Fn(&T) -> u64,
    J: Fn(&T) -> bool,
{
    if sample.len() == 1 {
        return Some(sample[0]);
    }

    let mut lowest: Option<(&'a T, u64)> = None;
    for &candidate in sample {
        if is_just_added(candidate) {
            continue;
        }
        let candidate_rank = rank(candidate);
        match lowest {
            Some((_, lowest_rank)) if candidate_rank >= lowest_rank => {}
            _ => lowest = Some((candidate, candidate_rank)),
        }
    }
    lowest.map(|(candidate, _)| candidate)
}

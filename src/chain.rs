//! Per-worker work chains.
//!
//! A worker keeps three queues of connection slab keys: connections with
//! readable data, connections with frames to flush and connections to tear
//! down. Each connection carries a [`ChainFlags`] bitset so it is queued at
//! most once per chain.

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chain {
    PendingRead,
    PendingWrite,
    PendingClose,
}

impl Chain {
    fn bit(self) -> u8 {
        match self {
            Chain::PendingRead => 0b001,
            Chain::PendingWrite => 0b010,
            Chain::PendingClose => 0b100,
        }
    }

    fn index(self) -> usize {
        match self {
            Chain::PendingRead => 0,
            Chain::PendingWrite => 1,
            Chain::PendingClose => 2,
        }
    }
}

/// Chain membership of one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainFlags(u8);

impl ChainFlags {
    pub fn contains(self, chain: Chain) -> bool {
        self.0 & chain.bit() != 0
    }

    pub fn insert(&mut self, chain: Chain) {
        self.0 |= chain.bit();
    }

    pub fn remove(&mut self, chain: Chain) {
        self.0 &= !chain.bit();
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Default)]
pub struct WorkChains {
    chains: [VecDeque<usize>; 3],
}

impl WorkChains {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `key` unless `membership` says it is already on `chain`.
    /// Returns whether it was added.
    pub fn enqueue(&mut self, chain: Chain, key: usize, membership: &mut ChainFlags) -> bool {
        if membership.contains(chain) {
            return false;
        }
        membership.insert(chain);
        self.chains[chain.index()].push_back(key);
        true
    }

    pub fn is_empty(&self, chain: Chain) -> bool {
        self.chains[chain.index()].is_empty()
    }

    pub fn len(&self, chain: Chain) -> usize {
        self.chains[chain.index()].len()
    }

    /// Take the whole chain for one pass. Membership flags are left set; the
    /// pass clears them or relinks the key.
    pub fn detach(&mut self, chain: Chain) -> VecDeque<usize> {
        std::mem::take(&mut self.chains[chain.index()])
    }

    /// Put back a key whose membership flag is still set.
    pub fn relink(&mut self, chain: Chain, key: usize) {
        self.chains[chain.index()].push_back(key);
    }
}

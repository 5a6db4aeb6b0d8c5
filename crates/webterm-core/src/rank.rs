//! Rank lookup used to gate arbitration commands.

use std::collections::HashMap;

/// Maps a client identity to its rank. Higher ranks may override lower ones.
pub trait RankLookup: Send + Sync {
    fn rank(&self, identity: &str) -> i64;
}

/// A fixed table of ranks with a fallback for everyone else.
#[derive(Debug, Clone, Default)]
pub struct StaticRanks {
    default_rank: i64,
    ranks: HashMap<String, i64>,
}

impl StaticRanks {
    pub fn new(default_rank: i64, ranks: HashMap<String, i64>) -> Self {
        Self { default_rank, ranks }
    }

    pub fn with_default(default_rank: i64) -> Self {
        Self::new(default_rank, HashMap::new())
    }

    pub fn set(&mut self, identity: impl Into<String>, rank: i64) {
        self.ranks.insert(identity.into(), rank);
    }
}

impl RankLookup for StaticRanks {
    fn rank(&self, identity: &str) -> i64 {
        self.ranks.get(identity).copied().unwrap_or(self.default_rank)
    }
}

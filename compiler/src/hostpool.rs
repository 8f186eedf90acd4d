// hostpool.rs - Host pools and their per-channel replicas
//
// A primitive in a parallel region whose pool carries one of the region's
// replicate tags is pinned to a per-channel copy of that pool. Copies are
// created lazily, once per (region, channel), and suffix the replicated
// tags with `_<channel>`.
//
// Preconditions: pool indices in the input are dense from 0.
// Postconditions: replicas take the next free pool index.
// Failure modes: unknown membership mode or pool index → `Internal`.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::adl;
use crate::diag::{Result, TransformError};
use crate::id::PoolIdx;
use crate::padl;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Shared,
    Exclusive,
}

impl Membership {
    pub fn parse(mode: &str) -> Result<Self> {
        match mode {
            "shared" => Ok(Membership::Shared),
            "exclusive" => Ok(Membership::Exclusive),
            other => Err(TransformError::internal(format!(
                "'{}' is not a valid hostpool membership kind",
                other
            ))),
        }
    }
}

impl fmt::Display for Membership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Membership::Shared => write!(f, "shared"),
            Membership::Exclusive => write!(f, "exclusive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hostpool {
    pub index: PoolIdx,
    pub name: String,
    /// 0 when the input gave no positive size.
    pub size: u64,
    pub membership: Membership,
    pub hosts: Vec<String>,
    pub tags: BTreeSet<String>,
    replicas: BTreeMap<(u64, u64), PoolIdx>,
}

impl Hostpool {
    pub fn from_record(record: &adl::Hostpool) -> Result<Self> {
        Ok(Hostpool {
            index: PoolIdx(record.index),
            name: record.name.clone(),
            size: record.size.filter(|&s| s > 0).unwrap_or(0),
            membership: Membership::parse(&record.membership_mode)?,
            hosts: record.hosts.clone(),
            tags: record.tags.iter().cloned().collect(),
            replicas: BTreeMap::new(),
        })
    }

    pub fn to_padl(&self) -> padl::Hostpool {
        padl::Hostpool {
            index: self.index.0,
            name: self.name.clone(),
            size: (self.size > 0).then_some(self.size),
            membership_mode: self.membership.to_string(),
            hosts: self.hosts.clone(),
            tags: self.tags.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hostpools {
    pools: BTreeMap<PoolIdx, Hostpool>,
}

impl Hostpools {
    pub fn load(records: &[adl::Hostpool]) -> Result<Self> {
        let mut pools = BTreeMap::new();
        for record in records {
            let pool = Hostpool::from_record(record)?;
            pools.insert(pool.index, pool);
        }
        Ok(Hostpools { pools })
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn get(&self, index: PoolIdx) -> Result<&Hostpool> {
        self.pools
            .get(&index)
            .ok_or_else(|| TransformError::internal(format!("invalid hostpool index {}", index)))
    }

    /// The pool used by `channel` of `region` in place of `pool`. Tags in
    /// `intersect` are suffixed with the channel; the others are kept.
    pub fn find_or_create_replica(
        &mut self,
        pool: PoolIdx,
        region: u64,
        channel: u64,
        intersect: &BTreeSet<String>,
    ) -> Result<PoolIdx> {
        let next = PoolIdx(self.pools.len() as u64);
        let original = self
            .pools
            .get_mut(&pool)
            .ok_or_else(|| TransformError::internal(format!("invalid hostpool index {}", pool)))?;
        if let Some(&existing) = original.replicas.get(&(region, channel)) {
            return Ok(existing);
        }
        let tags = original
            .tags
            .iter()
            .map(|tag| {
                if intersect.contains(tag) {
                    format!("{}_{}", tag, channel)
                } else {
                    tag.clone()
                }
            })
            .collect();
        let replica = Hostpool {
            index: next,
            name: format!("{}_{}_{}", original.name, region, channel),
            size: original.size,
            membership: original.membership,
            hosts: original.hosts.clone(),
            tags,
            replicas: BTreeMap::new(),
        };
        original.replicas.insert((region, channel), next);
        tracing::trace!(pool = %pool, region, channel, replica = %replica.name, "created hostpool replica");
        self.pools.insert(next, replica);
        Ok(next)
    }

    /// All pools, replicas included, in index order.
    pub fn to_padl(&self) -> Result<Vec<padl::Hostpool>> {
        (0..self.pools.len() as u64)
            .map(|i| self.get(PoolIdx(i)).map(Hostpool::to_padl))
            .collect()
    }
}

/*
 * Copyright © 2023 Archer <archer@nefarious.dev>
 * Licensed under the Apache License, Version 2.0 (the "Licence");
 * you may not use this file except in compliance with the Licence.
 * You may obtain a copy of the Licence at
 *     https://www.apache.org/licenses/LICENSE-2.0
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the Licence is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the Licence for the specific language governing permissions and
 * limitations under the Licence.
 */

//! The static assignment of shards to servers.

use crate::{ConfigError, Result};

/// Assigns every shard to the server at index `shard % server_count`.
///
/// Indices refer to the server list the table was built for, including duplicates. Listing the same server twice
/// therefore gives it twice as many shards.
///
/// The assignment never changes after construction; there's no support for moving shards between servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardTable {
    server_count: usize,
    shard_count: usize,
}

impl ShardTable {
    /// Returns a table for `shard_count` shards spread over `server_count` servers.
    ///
    /// `address_space` is the number of shards the ID layout can address. Both counts must be non-zero and at most
    /// `address_space`, and `shard_count` must be a multiple of `server_count`.
    pub fn new(server_count: usize, shard_count: usize, address_space: u64) -> Result<Self> {
        if server_count == 0 {
            return Err(ConfigError::NoServers.into());
        }
        if shard_count == 0 {
            return Err(ConfigError::NoShards.into());
        }
        if server_count as u64 > address_space {
            return Err(ConfigError::TooManyServers {
                servers: server_count,
                max: address_space,
            }
            .into());
        }
        if shard_count as u64 > address_space {
            return Err(ConfigError::TooManyShards {
                shards: shard_count,
                max: address_space,
            }
            .into());
        }
        if shard_count < server_count {
            return Err(ConfigError::FewerShardsThanServers {
                shards: shard_count,
                servers: server_count,
            }
            .into());
        }
        if shard_count % server_count != 0 {
            return Err(ConfigError::UnevenShards {
                shards: shard_count,
                servers: server_count,
            }
            .into());
        }

        Ok(Self {
            server_count,
            shard_count,
        })
    }

    /// Returns the index of the server owning `shard`.
    ///
    /// `shard` is expected to be less than [`shard_count`](Self::shard_count); use [`normalize`](Self::normalize)
    /// for arbitrary numbers.
    #[inline]
    pub fn owner(&self, shard: u64) -> usize {
        (shard % self.server_count as u64) as usize
    }

    /// Returns the shards owned by the server at `index` in ascending order.
    ///
    /// The iterator is empty if `index` is out of range.
    pub fn shards_of(&self, index: usize) -> impl Iterator<Item = u64> {
        let start = if index < self.server_count { index } else { self.shard_count };
        (start..self.shard_count).step_by(self.server_count).map(|shard| shard as u64)
    }

    /// Maps an arbitrary number to a shard number by taking its Euclidean remainder.
    ///
    /// Negative numbers land in range as well, e.g. `-1` maps to the last shard.
    #[inline]
    pub fn normalize(&self, number: i64) -> u64 {
        // shard_count fits into an i64, as it's bounded by the address space
        number.rem_euclid(self.shard_count as i64) as u64
    }

    /// Returns the number of shards.
    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// Returns the number of servers, counting duplicates.
    #[inline]
    pub fn server_count(&self) -> usize {
        self.server_count
    }
}

// End skip coverage

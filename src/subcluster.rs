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

//! Windows of consecutive shards.

use crate::{fanout, BoxError, Cluster, Result, Server, Shard};

/// A window of consecutive shards of a [`Cluster`].
///
/// Sub-clusters address a bounded working set, e.g. to run a maintenance job on a few shards at a time. As the
/// shards of a cluster alternate between servers, a window of `size` shards touches `min(size, servers)` servers.
#[derive(Debug)]
pub struct SubCluster<'a, S> {
    cluster: &'a Cluster<S>,
    shards: &'a [Shard<S>],
}

impl<'a, S: Server> SubCluster<'a, S> {
    /// Returns the window of `cluster` chosen by `selector`.
    ///
    /// The cluster's shards are split into `shard_count / size` windows of `size` shards each, and `selector` picks
    /// one of them, wrapping around (negative selectors included). `size` is clamped to the range
    /// `1..=shard_count`, so a `size` of zero yields single-shard windows and an oversized `size` yields the whole
    /// cluster.
    ///
    /// The window only depends on the arguments; the same selector always yields the same shards.
    ///
    /// # Example
    ///
    /// ```
    /// use shardwise::{Cluster, Server};
    /// use std::sync::Arc;
    ///
    /// #[derive(Debug)]
    /// struct Db;
    ///
    /// impl Server for Db {
    ///     type Error = std::io::Error;
    ///
    ///     fn close(&self) -> Result<(), Self::Error> {
    ///         Ok(())
    ///     }
    /// }
    ///
    /// let cluster = Cluster::new(vec![Arc::new(Db)], 8)?;
    /// let ids = |selector| -> Vec<u64> { cluster.sub_cluster(selector, 2).shards().iter().map(|s| s.id()).collect() };
    /// assert_eq!(vec![0, 1], ids(0));
    /// assert_eq!(vec![4, 5], ids(2));
    /// assert_eq!(vec![0, 1], ids(4));
    /// # Ok::<(), shardwise::Error>(())
    /// ```
    pub fn new(cluster: &'a Cluster<S>, selector: i64, size: usize) -> Self {
        let all = cluster.all_shards();
        let size = size.clamp(1, all.len());
        let step = (all.len() / size) as i64;
        let start = selector.rem_euclid(step) as usize * size;
        Self {
            cluster,
            shards: &all[start..start + size],
        }
    }

    /// Maps `number` to one of the shards in this window.
    ///
    /// Any number is accepted; it's reduced modulo the window size, with negative numbers wrapping around.
    #[inline]
    pub fn shard(&self, number: i64) -> &'a Shard<S> {
        &self.shards[number.rem_euclid(self.shards.len() as i64) as usize]
    }

    /// Returns the shards in this window, ordered by their number.
    #[inline]
    pub fn shards(&self) -> &'a [Shard<S>] {
        self.shards
    }

    /// Returns the number of shards in this window.
    #[inline]
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Returns `true` if this window contains no shards, which never happens for windows created by
    /// [`new`](Self::new).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Returns the cluster this window belongs to.
    #[inline]
    pub fn cluster(&self) -> &'a Cluster<S> {
        self.cluster
    }

    /// Calls `f` once for every shard in this window.
    ///
    /// Servers are visited concurrently, but the shards of one server are visited one after another.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FanOut`](crate::Error::FanOut) with the first error reported by `f`. The remaining shards are
    /// visited anyway.
    pub fn for_each_shard<F>(&self, f: F) -> Result<()>
    where
        F: Fn(&Shard<S>) -> std::result::Result<(), BoxError> + Sync,
    {
        tracing::debug!(shards = self.shards.len(), "Running on every shard of sub-cluster");
        fanout::by_server(self.cluster.servers(), self.shards, None, &f)
    }

    /// Calls `f` once for every shard in this window, visiting up to `n` shards of each server at once.
    ///
    /// A limit of zero is treated as one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FanOut`](crate::Error::FanOut) with the first error reported by `f`. The remaining shards are
    /// visited anyway.
    pub fn for_each_n_shards<F>(&self, n: usize, f: F) -> Result<()>
    where
        F: Fn(&Shard<S>) -> std::result::Result<(), BoxError> + Sync,
    {
        tracing::debug!(shards = self.shards.len(), limit = n, "Running on every shard of sub-cluster");
        fanout::by_server(self.cluster.servers(), self.shards, Some(n), &f)
    }
}

impl<S> Clone for SubCluster<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for SubCluster<'_, S> {}

// End skip coverage

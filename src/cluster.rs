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

//! Routing shards to servers and running work on all of them.

use crate::{fanout, BoxError, Error, IdCodec, Result, Shard, ShardTable, SubCluster};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A handle to a physical database server.
///
/// Handles are compared by identity: two `Arc`s pointing to the same handle are the same server, even if they were
/// passed to [`Cluster::new`] multiple times.
pub trait Server: Send + Sync {
    /// The error returned if the server can't be closed.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Releases the resources held by this handle.
    fn close(&self) -> std::result::Result<(), Self::Error>;
}

/// Many logical shards mapped onto few physical servers.
///
/// Shard `i` lives on `servers[i % servers.len()]`, where `servers` is the list passed to [`new`](Self::new). The
/// mapping is fixed when the cluster is created.
///
/// # Example
///
/// ```
/// use shardwise::{Cluster, Server};
/// use std::sync::Arc;
///
/// #[derive(Debug)]
/// struct Db(&'static str);
///
/// impl Server for Db {
///     type Error = std::io::Error;
///
///     fn close(&self) -> Result<(), Self::Error> {
///         Ok(())
///     }
/// }
///
/// let (a, b) = (Arc::new(Db("a")), Arc::new(Db("b")));
/// let cluster = Cluster::new(vec![a.clone(), b.clone()], 8)?;
///
/// let on_a: Vec<u64> = cluster.shards(Some(&a)).iter().map(|shard| shard.id()).collect();
/// assert_eq!(vec![0, 2, 4, 6], on_a);
/// assert!(Arc::ptr_eq(&b, cluster.server_for(-1)));
/// # Ok::<(), shardwise::Error>(())
/// ```
#[derive(Debug)]
pub struct Cluster<S> {
    dbs: Vec<Arc<S>>,
    servers: Vec<Arc<S>>,
    table: ShardTable,
    shards: Vec<Shard<S>>,
    codec: IdCodec,
    closed: AtomicBool,
}

impl<S: Server> Cluster<S> {
    /// Returns a cluster running `shard_count` shards on `dbs`, using the default [`IdCodec`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `dbs` is empty, `shard_count` is zero, either exceeds the 2048 shards an ID can
    /// address, or `shard_count` isn't a multiple of `dbs.len()`.
    pub fn new(dbs: Vec<Arc<S>>, shard_count: usize) -> Result<Self> {
        Self::with_codec(dbs, shard_count, IdCodec::default())
    }

    /// Returns a cluster running `shard_count` shards on `dbs`, generating IDs with `codec`.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new), with the address space given by [`IdCodec::num_shards`].
    pub fn with_codec(dbs: Vec<Arc<S>>, shard_count: usize, codec: IdCodec) -> Result<Self> {
        let table = ShardTable::new(dbs.len(), shard_count, codec.num_shards())?;

        let mut servers: Vec<Arc<S>> = Vec::with_capacity(dbs.len());
        for db in &dbs {
            if !servers.iter().any(|server| Arc::ptr_eq(server, db)) {
                servers.push(Arc::clone(db));
            }
        }

        let shards = (0..shard_count as u64)
            .map(|id| Shard::new(id, Arc::clone(&dbs[table.owner(id)]), codec))
            .collect();

        tracing::debug!(
            dbs = dbs.len(),
            servers = servers.len(),
            shards = shard_count,
            "Created cluster"
        );

        Ok(Self {
            dbs,
            servers,
            table,
            shards,
            codec,
            closed: AtomicBool::new(false),
        })
    }

    /// Registers an additional parameter on every shard, replacing any previous value of the same name.
    ///
    /// See [`Shard::with_param`] for how parameters are substituted.
    ///
    /// # Example
    ///
    /// ```
    /// # use shardwise::{Cluster, Server};
    /// # use std::sync::Arc;
    /// # #[derive(Debug)]
    /// # struct Db;
    /// # impl Server for Db {
    /// #     type Error = std::io::Error;
    /// #     fn close(&self) -> Result<(), Self::Error> {
    /// #         Ok(())
    /// #     }
    /// # }
    /// let cluster = Cluster::new(vec![Arc::new(Db)], 4)?.with_param("SCHEMA", "app");
    /// assert_eq!("SELECT * FROM app.shard2", cluster.shard(2).render("SELECT * FROM ?SCHEMA.?SHARD")?);
    /// # Ok::<(), shardwise::Error>(())
    /// ```
    pub fn with_param(mut self, name: impl Into<String>, value: impl fmt::Display) -> Self {
        let name = name.into();
        let value = value.to_string();
        self.shards = self
            .shards
            .into_iter()
            .map(|shard| shard.with_param(name.clone(), &value))
            .collect();
        self
    }

    /// Maps `number` to a shard.
    ///
    /// Any number is accepted; it's reduced modulo the shard count, with negative numbers wrapping around.
    #[inline]
    pub fn shard(&self, number: i64) -> &Shard<S> {
        &self.shards[self.table.normalize(number) as usize]
    }

    /// Returns the server hosting the shard `number` maps to.
    #[inline]
    pub fn server_for(&self, number: i64) -> &Arc<S> {
        self.shard(number).server()
    }

    /// Maps a string to a shard using its 32-bit FNV-1a hash.
    ///
    /// The hash isn't seeded, so a string always maps to the same shard for a given shard count.
    #[inline]
    pub fn shard_by_key(&self, key: &str) -> &Shard<S> {
        self.shard(i64::from(fnv1a32(key.as_bytes())))
    }

    /// Returns the shard an ID was generated on.
    #[inline]
    pub fn shard_by_id(&self, id: i64) -> &Shard<S> {
        let shard = self.codec.decode(id).shard;
        &self.shards[(shard % self.shards.len() as u64) as usize]
    }

    /// Returns the index into the server list passed to [`new`](Self::new) of the server hosting the shard `number`
    /// maps to.
    #[inline]
    pub fn server_index(&self, number: i64) -> usize {
        self.table.owner(self.table.normalize(number))
    }

    /// Returns every distinct server in the order it first appeared in the server list.
    #[inline]
    pub fn servers(&self) -> &[Arc<S>] {
        &self.servers
    }

    /// Returns the shards hosted on `server`, or all shards if `server` is `None`.
    pub fn shards(&self, server: Option<&Arc<S>>) -> Vec<&Shard<S>> {
        match server {
            None => self.shards.iter().collect(),
            Some(server) => self
                .shards
                .iter()
                .filter(|shard| Arc::ptr_eq(shard.server(), server))
                .collect(),
        }
    }

    /// Returns all shards ordered by their number.
    #[inline]
    pub fn all_shards(&self) -> &[Shard<S>] {
        &self.shards
    }

    /// Returns the number of shards.
    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Returns the codec of the IDs generated on this cluster's shards.
    #[inline]
    pub fn codec(&self) -> &IdCodec {
        &self.codec
    }

    /// Returns the assignment of shards to servers.
    #[inline]
    pub fn table(&self) -> &ShardTable {
        &self.table
    }

    /// Returns a window of `size` consecutive shards chosen by `selector`.
    ///
    /// See [`SubCluster::new`] for how the window is chosen.
    pub fn sub_cluster(&self, selector: i64, size: usize) -> SubCluster<'_, S> {
        SubCluster::new(self, selector, size)
    }

    /// Calls `f` once for every distinct server, running all calls concurrently.
    ///
    /// All calls run to completion even if some of them fail.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FanOut`] with the first error reported by `f`.
    pub fn for_each_server<F>(&self, f: F) -> Result<()>
    where
        F: Fn(&Arc<S>) -> std::result::Result<(), BoxError> + Sync,
    {
        tracing::debug!(servers = self.servers.len(), "Running on every server");
        fanout::concurrently(&self.servers, &f)
    }

    /// Calls `f` once for every shard.
    ///
    /// Servers are visited concurrently, but the shards of one server are visited one after another.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FanOut`] with the first error reported by `f`. The remaining shards are visited anyway.
    pub fn for_each_shard<F>(&self, f: F) -> Result<()>
    where
        F: Fn(&Shard<S>) -> std::result::Result<(), BoxError> + Sync,
    {
        tracing::debug!(shards = self.shards.len(), "Running on every shard");
        fanout::by_server(&self.servers, &self.shards, None, &f)
    }

    /// Calls `f` once for every shard, visiting up to `n` shards of each server at once.
    ///
    /// A limit of zero is treated as one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FanOut`] with the first error reported by `f`. The remaining shards are visited anyway.
    pub fn for_each_n_shards<F>(&self, n: usize, f: F) -> Result<()>
    where
        F: Fn(&Shard<S>) -> std::result::Result<(), BoxError> + Sync,
    {
        tracing::debug!(shards = self.shards.len(), limit = n, "Running on every shard");
        fanout::by_server(&self.servers, &self.shards, Some(n), &f)
    }

    /// Closes every distinct server once.
    ///
    /// All servers are closed even if some of them fail. Calling this again has no effect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Close`] with the first error reported by a server.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut first = None;
        for (index, server) in self.servers.iter().enumerate() {
            if let Err(err) = server.close() {
                tracing::warn!(server = index, error = %err, "Failed to close server");
                first.get_or_insert(err);
            }
        }
        match first {
            Some(err) => Err(Error::Close(Box::new(err))),
            None => Ok(()),
        }
    }

    /// Returns the server list the cluster was created with, including duplicates.
    #[inline]
    pub fn dbs(&self) -> &[Arc<S>] {
        &self.dbs
    }
}

/// Returns the 32-bit FNV-1a hash of `bytes`.
pub(crate) fn fnv1a32(bytes: &[u8]) -> u32 {
    const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

// End skip coverage

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

//! This crate maps many logical database shards onto far fewer physical servers and generates IDs that remember the
//! shard they were created on.
//!
//! A [`Cluster`] is built from a list of server handles and a shard count that's a multiple of the number of handles.
//! Shard `i` lives on server `i % servers`, so a record's shard can be derived from a number (e.g. an account ID), a
//! string (hashed with FNV-1a), or an ID generated by this crate.
//!
//! IDs come in two flavours:
//! * [`ShardIdGen`] produces signed 64-bit snowflake-like IDs consisting of a millisecond timestamp, the shard number,
//!   and a per-generator sequence number. The bit layout is configurable through [`IdCodec`]; the default layout uses
//!   41, 11, and 12 bits, respectively, and an epoch at the start of 2010.
//! * [`KeyGen`] produces 128-bit [`ShardKey`]s with a microsecond timestamp, the shard number, and 53 random bits.
//!   They don't need a shared counter, but their uniqueness is only statistical.
//!
//! The crate doesn't talk to databases itself. Server handles only need to implement [`Server`], and each [`Shard`]
//! renders the `?SHARD`, `?SHARD_ID`, and `?EPOCH` placeholders in queries before they are handed to the driver.
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use shardwise::{Cluster, Server};
//! use std::sync::Arc;
//!
//! #[derive(Debug)]
//! struct Postgres {
//!     addr: &'static str,
//! }
//!
//! impl Server for Postgres {
//!     type Error = std::io::Error;
//!
//!     fn close(&self) -> Result<(), Self::Error> {
//!         // Close the connection pool here
//!         Ok(())
//!     }
//! }
//!
//! let db1 = Arc::new(Postgres { addr: "db1" });
//! let db2 = Arc::new(Postgres { addr: "db2" });
//! let cluster = Cluster::new(vec![db1.clone(), db2.clone()], 8)?;
//!
//! // Users are partitioned by their account ID
//! let shard = cluster.shard(1234);
//! assert_eq!("shard2", shard.name());
//! assert!(Arc::ptr_eq(&db1, shard.server()));
//!
//! // IDs generated on a shard route back to the same shard without a lookup
//! let id = shard.id_gen().next(Utc::now());
//! assert_eq!(shard.id(), cluster.shard_by_id(id).id());
//!
//! let query = shard.render("SELECT * FROM ?SHARD.users WHERE shard_id = ?SHARD_ID")?;
//! assert_eq!("SELECT * FROM shard2.users WHERE shard_id = 2", query);
//!
//! cluster.close()?;
//! # Ok::<(), shardwise::Error>(())
//! ```

#![warn(missing_docs, missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod cluster;
pub mod codec;
mod fanout;
pub mod generator;
pub mod key;
pub mod shard;
pub mod subcluster;
mod sync;
pub mod table;

pub use cluster::{Cluster, Server};
pub use codec::{CodecConfig, IdCodec, IdParts, DEFAULT_EPOCH_MILLIS};
pub use generator::ShardIdGen;
pub use key::{KeyGen, KeyParts, ShardKey};
pub use shard::{AppendQuery, Query, Shard};
pub use subcluster::SubCluster;
pub use table::ShardTable;

/// A type-erased error returned by callbacks and server handles.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur when configuring a cluster or working with its shards and IDs.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The cluster or ID layout was configured with invalid parameters.
    ///
    /// This error only occurs when constructing a [`Cluster`], [`ShardTable`], or [`IdCodec`]. It's never recovered
    /// internally.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// A textual or binary [`ShardKey`] couldn't be parsed.
    #[error("invalid shard key: {0}")]
    Format(String),
    /// A composed [`Query`] failed to render itself.
    #[error("failed to render query: {0}")]
    Query(#[source] BoxError),
    /// A callback passed to one of the `for_each_*` functions failed.
    ///
    /// If more than one callback fails, this contains the error that was reported first. All other callbacks still
    /// run to completion.
    #[error("fan-out callback failed: {0}")]
    FanOut(#[source] BoxError),
    /// At least one server couldn't be closed.
    ///
    /// This contains the first failure; the remaining servers are still closed.
    #[error("failed to close server: {0}")]
    Close(#[source] BoxError),
}

/// Reasons why a configuration can be rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The server list is empty.
    #[error("at least one server is required")]
    NoServers,
    /// The shard count is zero.
    #[error("at least one shard is required")]
    NoShards,
    /// The shard count exceeds the number of shards an ID can address.
    #[error("{shards} shards exceed the address space of {max} shards")]
    TooManyShards {
        /// The requested shard count.
        shards: usize,
        /// The number of shards supported by the ID layout.
        max: u64,
    },
    /// The server count exceeds the number of shards an ID can address.
    #[error("{servers} servers exceed the address space of {max} shards")]
    TooManyServers {
        /// The number of servers passed to the cluster.
        servers: usize,
        /// The number of shards supported by the ID layout.
        max: u64,
    },
    /// There are fewer shards than servers.
    #[error("number of shards ({shards}) must be greater than or equal to the number of servers ({servers})")]
    FewerShardsThanServers {
        /// The requested shard count.
        shards: usize,
        /// The number of servers passed to the cluster.
        servers: usize,
    },
    /// The shards can't be spread evenly across the servers.
    #[error("number of shards ({shards}) must be divisible by the number of servers ({servers})")]
    UnevenShards {
        /// The requested shard count.
        shards: usize,
        /// The number of servers passed to the cluster.
        servers: usize,
    },
    /// The bit widths of an ID layout don't add up to 64 or leave no room for the timestamp.
    #[error("bit widths {time_bits} + {shard_bits} + {seq_bits} must sum to 64 with at least one time bit")]
    BitWidths {
        /// Bits dedicated to the timestamp.
        time_bits: u32,
        /// Bits dedicated to the shard number.
        shard_bits: u32,
        /// Bits dedicated to the sequence number.
        seq_bits: u32,
    },
}

/// The primary result type of this crate.
pub type Result<T> = std::result::Result<T, Error>;

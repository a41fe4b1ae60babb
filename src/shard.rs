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

//! Logical shards and the queries rendered against them.
//!
//! A [`Shard`] pairs a shard number with the server it lives on and a set of named parameters. Queries passed to
//! [`Shard::render`] may refer to these parameters as `?NAME`:
//!
//! | Placeholder | Value                                    |
//! |-------------|------------------------------------------|
//! | `?SHARD`    | the shard's name, e.g. `shard12`         |
//! | `?SHARD_ID` | the shard number, e.g. `12`              |
//! | `?EPOCH`    | the ID epoch in milliseconds since 1970  |
//!
//! Placeholders for names that aren't registered, including plain positional `?`, are left untouched for the
//! database driver.

use crate::{BoxError, Error, IdCodec, Result, ShardIdGen};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// The parameter holding the shard's name.
pub const SHARD: &str = "SHARD";
/// The parameter holding the shard number.
pub const SHARD_ID: &str = "SHARD_ID";
/// The parameter holding the epoch of the shard's IDs.
pub const EPOCH: &str = "EPOCH";

/// A query that renders itself into a buffer.
///
/// Implement this for query builders that should be usable with [`Shard::render`].
pub trait AppendQuery {
    /// Appends the query text to `buf`.
    fn append_query(&self, buf: &mut String) -> std::result::Result<(), BoxError>;
}

/// A query accepted by [`Shard::render`].
#[derive(Copy, Clone)]
pub enum Query<'a> {
    /// Plain query text.
    Text(&'a str),
    /// A query that renders itself.
    Composed(&'a dyn AppendQuery),
}

impl Query<'_> {
    fn append_to(&self, buf: &mut String) -> Result<()> {
        match self {
            Query::Text(text) => {
                buf.push_str(text);
                Ok(())
            }
            Query::Composed(query) => query.append_query(buf).map_err(Error::Query),
        }
    }
}

impl fmt::Debug for Query<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Query::Composed(_) => f.debug_tuple("Composed").finish_non_exhaustive(),
        }
    }
}

impl<'a> From<&'a str> for Query<'a> {
    fn from(text: &'a str) -> Self {
        Query::Text(text)
    }
}

impl<'a> From<&'a String> for Query<'a> {
    fn from(text: &'a String) -> Self {
        Query::Text(text)
    }
}

impl<'a> From<&'a dyn AppendQuery> for Query<'a> {
    fn from(query: &'a dyn AppendQuery) -> Self {
        Query::Composed(query)
    }
}

/// A logical shard living on a server of type `S`.
///
/// Shards are created by a [`Cluster`](crate::Cluster) and carry the parameters listed in the
/// [module documentation](self). Clones share the server handle and the ID generator.
#[derive(Debug)]
pub struct Shard<S> {
    id: u64,
    name: String,
    server: Arc<S>,
    id_gen: ShardIdGen,
    params: BTreeMap<String, String>,
}

impl<S> Shard<S> {
    /// Returns shard `id` on `server`, generating IDs with `codec`.
    pub fn new(id: u64, server: Arc<S>, codec: IdCodec) -> Self {
        let name = format!("shard{id}");
        let mut params = BTreeMap::new();
        params.insert(SHARD.to_owned(), name.clone());
        params.insert(SHARD_ID.to_owned(), id.to_string());
        params.insert(EPOCH.to_owned(), codec.epoch_millis().to_string());
        Self {
            id,
            name,
            server,
            id_gen: ShardIdGen::new(id, codec),
            params,
        }
    }

    /// Registers an additional parameter, replacing any previous value of the same name.
    ///
    /// Names should only consist of ASCII letters, digits, and underscores; other names are never substituted.
    /// Overriding one of the built-in parameters only affects rendering: [`name`](Self::name) keeps returning
    /// `shard<id>`. The shards of a [`Cluster`](crate::Cluster) are parameterised through
    /// [`Cluster::with_param`](crate::Cluster::with_param).
    pub fn with_param(mut self, name: impl Into<String>, value: impl fmt::Display) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    /// Returns the shard number.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the shard's name, e.g. `shard12`.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the server the shard lives on.
    #[inline]
    pub fn server(&self) -> &Arc<S> {
        &self.server
    }

    /// Returns the value of the given parameter.
    #[inline]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Returns all parameters ordered by name.
    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Returns the generator for IDs created on this shard.
    #[inline]
    pub fn id_gen(&self) -> &ShardIdGen {
        &self.id_gen
    }

    /// Returns the codec of this shard's IDs.
    #[inline]
    pub fn codec(&self) -> &IdCodec {
        self.id_gen.codec()
    }

    /// Renders `query` and substitutes this shard's parameters.
    ///
    /// A placeholder is the longest run of ASCII letters, digits, and underscores following a `?`. It's only replaced
    /// if the whole run names a parameter, so `?SHARD_ID` is never mistaken for `?SHARD` followed by `_ID`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] if a [`Query::Composed`] fails to render.
    ///
    /// # Example
    ///
    /// ```
    /// use shardwise::{IdCodec, Shard};
    /// use std::sync::Arc;
    ///
    /// let shard = Shard::new(3, Arc::new(()), IdCodec::default());
    /// let query = shard.render("SELECT * FROM ?SHARD.users WHERE id = ? AND shard_id = ?SHARD_ID")?;
    /// assert_eq!("SELECT * FROM shard3.users WHERE id = ? AND shard_id = 3", query);
    /// # Ok::<(), shardwise::Error>(())
    /// ```
    pub fn render<'q>(&self, query: impl Into<Query<'q>>) -> Result<String> {
        let mut raw = String::new();
        query.into().append_to(&mut raw)?;
        Ok(self.substitute(&raw))
    }

    fn substitute(&self, raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;
        while let Some(pos) = rest.find('?') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            let len = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            let name = &after[..len];
            match self.params.get(name) {
                Some(value) if !name.is_empty() => out.push_str(value),
                _ => {
                    out.push('?');
                    out.push_str(name);
                }
            }
            rest = &after[len..];
        }
        out.push_str(rest);
        out
    }
}

impl<S> Clone for Shard<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            server: Arc::clone(&self.server),
            id_gen: self.id_gen.clone(),
            params: self.params.clone(),
        }
    }
}

impl<S> fmt::Display for Shard<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// End skip coverage

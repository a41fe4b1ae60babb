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

//! A thread-safe ID generator bound to a single shard.

use crate::sync::{Arc, AtomicU64, Ordering};
use crate::{IdCodec, IdParts};
use chrono::{DateTime, Utc};

/// A thread-safe generator for IDs of one shard.
///
/// Every call to [`next`](Self::next) takes the next value of an internal counter as the sequence number and encodes
/// it together with the given time and the generator's shard number. The counter is incremented with a single atomic
/// operation, so concurrent callers never observe the same sequence number. Clones of a generator share the counter.
///
/// # Capacity
///
/// The counter is never reset; it simply wraps around the sequence field of the [`IdCodec`]. A generator can
/// therefore issue at most [`max_sequence() + 1`](IdCodec::max_sequence) unique IDs per millisecond (4096 with the
/// default layout). If more IDs are requested within the same millisecond, the sequence number wraps around and the
/// generator returns an ID it already issued earlier in that millisecond. This isn't detected or reported; callers
/// that may exceed this rate need a wider sequence field.
///
/// Generators bound to different shards never produce the same ID, as their shard fields differ.
///
/// # Example
///
/// ```
/// use chrono::Utc;
/// use shardwise::{IdCodec, ShardIdGen};
/// use std::thread;
///
/// let generator = ShardIdGen::new(17, IdCodec::default());
/// let now = Utc::now();
/// let handles: Vec<_> = (0..2)
///     .map(|_| {
///         let generator = generator.clone();
///         thread::spawn(move || generator.next(now))
///     })
///     .collect();
/// let ids: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
/// assert_ne!(ids[0], ids[1]);
/// assert_eq!(17, generator.decode(ids[0]).shard);
/// ```
#[derive(Debug, Clone)]
pub struct ShardIdGen {
    shard: u64,
    seq: Arc<AtomicU64>,
    codec: IdCodec,
}

impl ShardIdGen {
    /// Returns a generator for the given shard.
    ///
    /// The shard number is reduced modulo the codec's [`num_shards`](IdCodec::num_shards).
    pub fn new(shard: u64, codec: IdCodec) -> Self {
        Self {
            shard: shard % codec.num_shards(),
            seq: Arc::new(AtomicU64::new(0)),
            codec,
        }
    }

    /// Returns a new ID for the given time.
    ///
    /// Refer to the [type documentation](Self#capacity) for the number of unique IDs this can produce per
    /// millisecond.
    pub fn next(&self, time: DateTime<Utc>) -> i64 {
        // Uniqueness only depends on the atomicity of the increment, not on its ordering relative to other memory
        // operations
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.codec.encode(time, self.shard, seq)
    }

    /// Returns a new ID for the current system time.
    #[inline]
    pub fn next_now(&self) -> i64 {
        self.next(Utc::now())
    }

    /// Returns the largest ID this generator can produce at `time`.
    #[inline]
    pub fn max_id(&self, time: DateTime<Utc>) -> i64 {
        self.codec.max_id_for_shard(time, self.shard)
    }

    /// Splits an ID into its parts using this generator's codec.
    #[inline]
    pub fn decode(&self, id: i64) -> IdParts {
        self.codec.decode(id)
    }

    /// Returns the shard number embedded in every ID of this generator.
    #[inline]
    pub fn shard(&self) -> u64 {
        self.shard
    }

    /// Returns the codec used by this generator.
    #[inline]
    pub fn codec(&self) -> &IdCodec {
        &self.codec
    }
}

// End skip coverage

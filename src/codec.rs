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

//! Packing of timestamps, shard numbers, and sequence numbers into 64-bit IDs.

use crate::{ConfigError, Result};
use chrono::{DateTime, Utc};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// The default epoch: the first millisecond of 2010 (UTC), in milliseconds since the Unix epoch.
pub const DEFAULT_EPOCH_MILLIS: i64 = 1_262_304_000_000;

/// The bit widths and epoch of an [`IdCodec`].
///
/// With the `serde` feature, this can be deserialised from an application's configuration. Missing fields fall back to
/// the default layout (41 time bits, 11 shard bits, 12 sequence bits, and [`DEFAULT_EPOCH_MILLIS`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CodecConfig {
    /// Bits dedicated to the millisecond timestamp.
    pub time_bits: u32,
    /// Bits dedicated to the shard number.
    pub shard_bits: u32,
    /// Bits dedicated to the sequence number.
    pub seq_bits: u32,
    /// The epoch in milliseconds since the Unix epoch.
    pub epoch_millis: i64,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            time_bits: 41,
            shard_bits: 11,
            seq_bits: 12,
            epoch_millis: DEFAULT_EPOCH_MILLIS,
        }
    }
}

/// Encodes `(time, shard, sequence)` triples into signed 64-bit IDs and back.
///
/// IDs are laid out most-significant-first as `[time][shard][sequence]`. The time field holds the number of
/// milliseconds since the codec's epoch as a signed value, so times up to `2^(time_bits - 1)` milliseconds *before*
/// the epoch can be encoded as negative IDs. With the default layout, this covers 1975-02-28 through 2044-12-31, and
/// every shard can issue 4096 IDs per millisecond.
///
/// Because the timestamp occupies the most significant bits, IDs are ordered by time first. For IDs with the same
/// millisecond, the shard number and then the sequence number decide.
///
/// # Example
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use shardwise::IdCodec;
///
/// let codec = IdCodec::default();
/// let time = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
/// let id = codec.encode(time, 42, 7);
///
/// let parts = codec.decode(id);
/// assert_eq!(Some(time), parts.time());
/// assert_eq!(42, parts.shard);
/// assert_eq!(7, parts.seq);
/// assert!(codec.id_range(time).contains(&id));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdCodec {
    time_bits: u32,
    shard_bits: u32,
    seq_bits: u32,
    epoch_millis: i64,
    min_time_millis: i64,
    shard_mask: i64,
    seq_mask: i64,
}

impl IdCodec {
    /// Creates a codec with the given bit widths and epoch.
    ///
    /// The widths must sum to exactly 64 and `time_bits` must not be zero. Otherwise, this returns
    /// [`ConfigError::BitWidths`].
    pub fn new(time_bits: u32, shard_bits: u32, seq_bits: u32, epoch: DateTime<Utc>) -> Result<Self> {
        Self::from_config(&CodecConfig {
            time_bits,
            shard_bits,
            seq_bits,
            epoch_millis: epoch.timestamp_millis(),
        })
    }

    /// Creates a codec from a [`CodecConfig`].
    ///
    /// Refer to [`new`](Self::new) for the requirements.
    pub fn from_config(config: &CodecConfig) -> Result<Self> {
        let CodecConfig {
            time_bits,
            shard_bits,
            seq_bits,
            epoch_millis,
        } = *config;
        let total = time_bits.checked_add(shard_bits).and_then(|bits| bits.checked_add(seq_bits));
        if total != Some(64) || time_bits == 0 {
            return Err(ConfigError::BitWidths {
                time_bits,
                shard_bits,
                seq_bits,
            }
            .into());
        }
        let half_range = 1i128 << (time_bits - 1);
        let min_time_millis = (i128::from(epoch_millis) - half_range).max(i128::from(i64::MIN)) as i64;
        Ok(Self {
            time_bits,
            shard_bits,
            seq_bits,
            epoch_millis,
            min_time_millis,
            shard_mask: low_bits(shard_bits),
            seq_mask: low_bits(seq_bits),
        })
    }

    /// Encodes the given time, shard number, and sequence number into an ID.
    ///
    /// Only the lowest `shard_bits` of `shard` and the lowest `seq_bits` of `seq` are used, so a sequence number that
    /// exceeds its field wraps around. The time is truncated to milliseconds.
    ///
    /// Times before [`min_time_millis`](Self::min_time_millis) can't be represented. Instead of failing, they
    /// saturate to `i64::MIN`, which sorts before every other ID.
    pub fn encode(&self, time: DateTime<Utc>, shard: u64, seq: u64) -> i64 {
        let millis = time.timestamp_millis();
        if millis < self.min_time_millis {
            return i64::MIN;
        }
        let elapsed = millis.wrapping_sub(self.epoch_millis);
        (elapsed << (self.shard_bits + self.seq_bits))
            | ((shard as i64 & self.shard_mask) << self.seq_bits)
            | (seq as i64 & self.seq_mask)
    }

    /// Splits an ID into its timestamp, shard number, and sequence number.
    ///
    /// Every 64-bit integer is a structurally valid ID, so this never fails. That doesn't mean the ID was ever
    /// generated, though.
    pub fn decode(&self, id: i64) -> IdParts {
        IdParts {
            timestamp_millis: (id >> (self.shard_bits + self.seq_bits)).saturating_add(self.epoch_millis),
            shard: ((id >> self.seq_bits) & self.shard_mask) as u64,
            seq: (id & self.seq_mask) as u64,
        }
    }

    /// Returns the smallest ID that can be issued at `time` on any shard.
    #[inline]
    pub fn min_id(&self, time: DateTime<Utc>) -> i64 {
        self.encode(time, 0, 0)
    }

    /// Returns the largest ID that can be issued at `time` on any shard.
    #[inline]
    pub fn max_id(&self, time: DateTime<Utc>) -> i64 {
        self.encode(time, self.shard_mask as u64, self.seq_mask as u64)
    }

    /// Returns the largest ID that can be issued at `time` on the given shard.
    #[inline]
    pub fn max_id_for_shard(&self, time: DateTime<Utc>, shard: u64) -> i64 {
        self.encode(time, shard, self.seq_mask as u64)
    }

    /// Returns every ID that can be issued within the millisecond of `time`.
    ///
    /// This is useful for range scans, e.g. `WHERE id BETWEEN min AND max`.
    #[inline]
    pub fn id_range(&self, time: DateTime<Utc>) -> RangeInclusive<i64> {
        self.min_id(time)..=self.max_id(time)
    }

    /// Returns the number of shards this layout can address (`2^shard_bits`).
    #[inline]
    pub fn num_shards(&self) -> u64 {
        1 << self.shard_bits
    }

    /// Returns the largest sequence number that fits into an ID.
    ///
    /// A [`ShardIdGen`](crate::ShardIdGen) can issue `max_sequence() + 1` unique IDs per millisecond.
    #[inline]
    pub fn max_sequence(&self) -> u64 {
        self.seq_mask as u64
    }

    /// Returns the number of bits dedicated to the timestamp.
    #[inline]
    pub fn time_bits(&self) -> u32 {
        self.time_bits
    }

    /// Returns the number of bits dedicated to the shard number.
    #[inline]
    pub fn shard_bits(&self) -> u32 {
        self.shard_bits
    }

    /// Returns the number of bits dedicated to the sequence number.
    #[inline]
    pub fn seq_bits(&self) -> u32 {
        self.seq_bits
    }

    /// Returns the epoch in milliseconds since the Unix epoch.
    #[inline]
    pub fn epoch_millis(&self) -> i64 {
        self.epoch_millis
    }

    /// Returns the earliest representable time in milliseconds since the Unix epoch.
    #[inline]
    pub fn min_time_millis(&self) -> i64 {
        self.min_time_millis
    }
}

impl Default for IdCodec {
    /// Returns the default layout: 41 time bits, 11 shard bits, and 12 sequence bits with an epoch at the start of
    /// 2010.
    fn default() -> Self {
        let CodecConfig {
            time_bits,
            shard_bits,
            seq_bits,
            epoch_millis,
        } = CodecConfig::default();
        Self {
            time_bits,
            shard_bits,
            seq_bits,
            epoch_millis,
            min_time_millis: epoch_millis - (1 << (time_bits - 1)),
            shard_mask: low_bits(shard_bits),
            seq_mask: low_bits(seq_bits),
        }
    }
}

/// The parts of a decoded ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdParts {
    /// Milliseconds since the Unix epoch.
    pub timestamp_millis: i64,
    /// The shard number.
    pub shard: u64,
    /// The sequence number.
    pub seq: u64,
}

impl IdParts {
    /// Returns the timestamp as a [`DateTime`].
    ///
    /// This is `None` if the timestamp lies outside the range supported by `chrono`, which can only happen for
    /// layouts with very wide time fields.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp_millis)
    }
}

#[inline]
fn low_bits(bits: u32) -> i64 {
    // Every accepted layout has at least one time bit, so `bits` is at most 63
    ((1u64 << bits) - 1) as i64
}

// End skip coverage

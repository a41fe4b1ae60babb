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

//! 128-bit keys that embed a shard number and a microsecond timestamp.
//!
//! A [`ShardKey`] is laid out as follows:
//!
//! ```text
//! bytes 0..8   big-endian microseconds since the Unix epoch (two's complement)
//! byte  8      top 3 bits: shard >> 8, low 5 bits: random
//! byte  9      shard & 0xff
//! bytes 10..16 random
//! ```
//!
//! Unlike the IDs of [`ShardIdGen`](crate::ShardIdGen), keys don't need a shared counter. Two keys generated for the
//! same shard in the same microsecond only differ in their 53 random bits, so collisions are unlikely but possible.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The number of bits a [`ShardKey`] reserves for the shard number.
pub const KEY_SHARD_BITS: u32 = 11;

const KEY_LEN: usize = 16;
const HYPHENATED_LEN: usize = 36;
const SIMPLE_LEN: usize = 32;

/// A generator for [`ShardKey`]s.
///
/// The generator owns its random source and serialises access to it, so a single instance can be shared between
/// threads.
pub struct KeyGen {
    rng: Mutex<StdRng>,
}

impl KeyGen {
    /// Returns a generator seeded from the operating system.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Returns a generator using the given random source.
    ///
    /// This is mainly useful for tests, which can pass a seeded source to get reproducible keys.
    pub fn with_rng(rng: StdRng) -> Self {
        Self { rng: Mutex::new(rng) }
    }

    /// Returns a new key for the given shard and time.
    ///
    /// The shard number is reduced modulo 2<sup>11</sup>.
    pub fn generate(&self, shard: u64, time: DateTime<Utc>) -> ShardKey {
        let shard = shard % (1 << KEY_SHARD_BITS);

        let mut bytes = [0u8; KEY_LEN];
        bytes[..8].copy_from_slice(&time.timestamp_micros().to_be_bytes());
        self.rng.lock().fill_bytes(&mut bytes[8..]);
        bytes[8] = (bytes[8] & 0x1f) | (((shard >> 8) as u8) << 5);
        bytes[9] = shard as u8;
        ShardKey(bytes)
    }
}

impl Default for KeyGen {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for KeyGen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGen").finish_non_exhaustive()
    }
}

/// A 128-bit key embedding a shard number and a microsecond timestamp.
///
/// The textual form is the hyphenated lowercase hex representation also used by UUIDs. Keys sort by their timestamp
/// first, as long as it's after 1970.
///
/// # Example
///
/// ```
/// use chrono::Utc;
/// use shardwise::{KeyGen, ShardKey};
///
/// let key = KeyGen::new().generate(1234, Utc::now());
/// assert_eq!(1234, key.shard());
///
/// let text = key.to_string();
/// assert_eq!(36, text.len());
/// assert_eq!(key, text.parse::<ShardKey>()?);
/// # Ok::<(), shardwise::Error>(())
/// ```
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize), serde(try_from = "String", into = "String"))]
pub struct ShardKey([u8; KEY_LEN]);

impl ShardKey {
    /// Returns the key with all bits set to zero.
    #[inline]
    pub const fn nil() -> Self {
        Self([0; KEY_LEN])
    }

    /// Wraps the given bytes without validating them.
    #[inline]
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of this key.
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Returns `true` if all bits of this key are zero.
    #[inline]
    pub fn is_nil(&self) -> bool {
        self.0 == [0; KEY_LEN]
    }

    /// Parses a key from its 36-character hyphenated or 32-character plain hex form.
    pub fn parse(input: &str) -> Result<Self> {
        if input.len() != HYPHENATED_LEN && input.len() != SIMPLE_LEN {
            return Err(Error::Format(format!(
                "expected {HYPHENATED_LEN} or {SIMPLE_LEN} characters, got {}",
                input.len()
            )));
        }
        Uuid::parse_str(input)
            .map(|uuid| Self(uuid.into_bytes()))
            .map_err(|err| Error::Format(format!("{input:?}: {err}")))
    }

    /// Splits this key into its shard number and timestamp.
    pub fn split(&self) -> KeyParts {
        let mut micros = [0u8; 8];
        micros.copy_from_slice(&self.0[..8]);
        KeyParts {
            shard: (u64::from(self.0[8] >> 5) << 8) | u64::from(self.0[9]),
            timestamp_micros: i64::from_be_bytes(micros),
        }
    }

    /// Returns the shard number embedded in this key.
    #[inline]
    pub fn shard(&self) -> u64 {
        self.split().shard
    }

    /// Returns the time embedded in this key.
    #[inline]
    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.split().time()
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&Uuid::from_bytes(self.0).hyphenated(), f)
    }
}

impl FromStr for ShardKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&[u8]> for ShardKey {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        <[u8; KEY_LEN]>::try_from(bytes)
            .map(Self)
            .map_err(|_| Error::Format(format!("expected {KEY_LEN} bytes, got {}", bytes.len())))
    }
}

impl TryFrom<String> for ShardKey {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<ShardKey> for String {
    fn from(key: ShardKey) -> Self {
        key.to_string()
    }
}

impl From<ShardKey> for [u8; KEY_LEN] {
    fn from(key: ShardKey) -> Self {
        key.0
    }
}

/// The parts a [`ShardKey`] is made of, except for its random bits.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct KeyParts {
    /// The shard number.
    pub shard: u64,
    /// Microseconds since the Unix epoch.
    pub timestamp_micros: i64,
}

impl KeyParts {
    /// Returns the timestamp as a date, or `None` if it's out of range for [`DateTime`].
    #[inline]
    pub fn time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.timestamp_micros)
    }
}

// Skip coverage: We don't test the coverage of our unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn seeded() -> KeyGen {
        KeyGen::with_rng(StdRng::seed_from_u64(0x5eed))
    }

    #[test]
    fn layout() {
        let time = Utc.with_ymd_and_hms(2020, 6, 1, 12, 0, 0).unwrap();
        let key = seeded().generate(0b101_0000_0011, time);
        let bytes = key.as_bytes();

        assert_eq!(time.timestamp_micros().to_be_bytes(), bytes[..8]);
        assert_eq!(0b101, bytes[8] >> 5);
        assert_eq!(0b0000_0011, bytes[9]);
    }

    #[test]
    fn same_seed_same_keys() {
        let time = Utc::now();
        let a = seeded();
        let b = seeded();
        for shard in 0..16 {
            assert_eq!(a.generate(shard, time), b.generate(shard, time));
        }
    }

    #[test]
    fn reduces_shard_modulo_address_space() {
        assert_eq!(7, seeded().generate(2048 + 7, Utc::now()).shard());
    }

    #[test]
    fn split_recovers_every_shard() {
        let generator = seeded();
        let time = Utc::now();
        for shard in 0..(1 << KEY_SHARD_BITS) {
            let parts = generator.generate(shard, time).split();
            assert_eq!(shard, parts.shard);
            assert_eq!(time.timestamp_micros(), parts.timestamp_micros);
        }
    }

    #[test]
    fn split_recovers_time_across_years() {
        let generator = seeded();
        for year in 0..100_000 {
            let time = NaiveDate::from_ymd_opt(year, 3, 14)
                .and_then(|date| date.and_hms_micro_opt(15, 9, 26, 535_897))
                .unwrap()
                .and_utc();
            let shard = year as u64 % 2048;
            let key = generator.generate(shard, time);
            assert_eq!(shard, key.shard(), "year {year}");
            assert_eq!(Some(time), key.time(), "year {year}");
        }
    }

    #[test]
    fn text_round_trip() {
        let generator = seeded();
        for shard in [0, 1, 255, 256, 2047] {
            let key = generator.generate(shard, Utc::now());
            let text = key.to_string();
            assert_eq!(36, text.len());
            assert_eq!(key, text.parse().unwrap());
            assert_eq!(key, ShardKey::parse(&text.replace('-', "")).unwrap());
        }
    }

    #[test]
    fn display_is_hyphenated_lowercase_hex() {
        let key = ShardKey::from_bytes([
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0xa8, 0xb9, 0xca, 0xdb, 0xec, 0xfd, 0x0e, 0x1f,
        ]);
        assert_eq!("00010203-0405-0607-a8b9-cadbecfd0e1f", key.to_string());
    }

    #[test]
    fn rejects_bad_text() {
        for input in [
            "",
            "00010203-0405-0607-a8b9-cadbecfd0e1",
            "00010203-0405-0607-a8b9-cadbecfd0e1f0",
            "{00010203-0405-0607-a8b9-cadbecfd0e1f}",
            "00010203-0405-0607-a8b9-cadbecfd0e1g",
            "0001020304050607a8b9cadbecfd0e1z",
        ] {
            assert!(matches!(ShardKey::parse(input), Err(Error::Format(_))), "{input:?}");
        }
    }

    #[test]
    fn binary_form() {
        let key = seeded().generate(42, Utc::now());
        assert_eq!(key, ShardKey::try_from(&key.as_bytes()[..]).unwrap());
        assert!(matches!(ShardKey::try_from(&[0u8; 15][..]), Err(Error::Format(_))));
        assert!(matches!(ShardKey::try_from(&[0u8; 17][..]), Err(Error::Format(_))));
    }

    #[test]
    fn nil() {
        assert!(ShardKey::nil().is_nil());
        assert!(ShardKey::default().is_nil());
        assert_eq!("00000000-0000-0000-0000-000000000000", ShardKey::nil().to_string());
        assert!(!seeded().generate(0, Utc::now()).is_nil());
    }

    #[test]
    fn no_collisions_within_one_microsecond() {
        let generator = KeyGen::new();
        let time = Utc::now();
        let mut keys = HashSet::with_capacity(1_000_000);
        for _ in 0..1_000_000 {
            let key = generator.generate(1, time);
            assert!(keys.insert(key), "collision for {key}");
        }
    }

    #[test]
    fn concurrent_generation() {
        let generator = Arc::new(KeyGen::new());
        let time = Utc::now();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = generator.clone();
                thread::spawn(move || (0..10_000).map(|_| generator.generate(5, time)).collect::<Vec<_>>())
            })
            .collect();
        let keys: HashSet<ShardKey> = handles.into_iter().flat_map(|handle| handle.join().unwrap()).collect();
        assert_eq!(80_000, keys.len());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_as_string() {
        let key = seeded().generate(3, Utc::now());
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(format!("\"{key}\""), json);
        assert_eq!(key, serde_json::from_str::<ShardKey>(&json).unwrap());
        assert!(serde_json::from_str::<ShardKey>("\"nope\"").is_err());
    }
}
// End skip coverage

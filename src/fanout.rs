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

//! Runs callbacks on many servers or shards at once.
//!
//! Every callback runs to completion, even after another one failed. The first error, in the order the callbacks
//! finished, is returned; all others are logged and dropped. A panicking callback is propagated to the caller once all
//! other callbacks have finished.

use crate::{BoxError, Error, Result, Shard};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::Arc;
use std::thread;

/// Collects the first error reported by any callback.
struct FirstError {
    tx: Sender<BoxError>,
    rx: Receiver<BoxError>,
}

impl FirstError {
    fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(1);
        Self { tx, rx }
    }

    fn run<T: ?Sized, F>(&self, f: &F, item: &T)
    where
        F: Fn(&T) -> std::result::Result<(), BoxError>,
    {
        if let Err(err) = f(item) {
            if let Err(TrySendError::Full(err)) = self.tx.try_send(err) {
                tracing::debug!(error = %err, "Dropping error of concurrent callback");
            }
        }
    }

    fn into_result(self) -> Result<()> {
        match self.rx.try_recv() {
            Ok(err) => Err(Error::FanOut(err)),
            Err(_) => Ok(()),
        }
    }
}

/// Holds one slot of a bounded gate and frees it when dropped.
struct Permit<'a>(&'a Receiver<()>);

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let _ = self.0.try_recv();
    }
}

/// Calls `f` on every item, each on its own thread.
pub(crate) fn concurrently<T, F>(items: &[T], f: &F) -> Result<()>
where
    T: Sync,
    F: Fn(&T) -> std::result::Result<(), BoxError> + Sync,
{
    let errors = FirstError::new();
    thread::scope(|scope| {
        for item in items {
            let errors = &errors;
            scope.spawn(move || errors.run(f, item));
        }
    });
    errors.into_result()
}

/// Calls `f` on every shard, running one thread per server.
///
/// Shards are grouped by the server they live on. Without a `limit`, the shards of a server are visited one after
/// another. With a `limit`, up to that many shards of each server are visited at once; a limit of zero is treated as
/// one.
pub(crate) fn by_server<S, F>(servers: &[Arc<S>], shards: &[Shard<S>], limit: Option<usize>, f: &F) -> Result<()>
where
    S: Send + Sync,
    F: Fn(&Shard<S>) -> std::result::Result<(), BoxError> + Sync,
{
    let groups = group_by_server(servers, shards);
    let errors = FirstError::new();
    thread::scope(|scope| {
        for group in &groups {
            let errors = &errors;
            scope.spawn(move || match limit {
                None => sequentially(group, f, errors),
                Some(limit) => bounded(group, limit, f, errors),
            });
        }
    });
    errors.into_result()
}

fn sequentially<S, F>(shards: &[&Shard<S>], f: &F, errors: &FirstError)
where
    F: Fn(&Shard<S>) -> std::result::Result<(), BoxError>,
{
    for shard in shards {
        errors.run(f, *shard);
    }
}

fn bounded<S, F>(shards: &[&Shard<S>], limit: usize, f: &F, errors: &FirstError)
where
    S: Send + Sync,
    F: Fn(&Shard<S>) -> std::result::Result<(), BoxError> + Sync,
{
    let (gate, permits) = crossbeam_channel::bounded::<()>(limit.max(1));
    thread::scope(|scope| {
        for &shard in shards {
            // Blocks until a running callback frees its slot. The receiver outlives the scope, so this can't fail.
            let _ = gate.send(());
            let permit = Permit(&permits);
            scope.spawn(move || {
                let _permit = permit;
                errors.run(f, shard);
            });
        }
    });
}

/// Returns the shards of every server that has at least one, in the order of `servers`.
fn group_by_server<'a, S>(servers: &[Arc<S>], shards: &'a [Shard<S>]) -> Vec<Vec<&'a Shard<S>>> {
    servers
        .iter()
        .map(|server| shards.iter().filter(|shard| Arc::ptr_eq(shard.server(), server)).collect::<Vec<_>>())
        .filter(|group| !group.is_empty())
        .collect()
}

// End skip coverage

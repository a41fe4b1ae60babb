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

use chrono::Utc;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use shardwise::{BoxError, Cluster, Error, KeyGen, Server, Shard};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
struct User {
    id: i64,
    account_id: i64,
    name: String,
}

#[derive(Debug)]
struct Closed;

impl fmt::Display for Closed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("database is closed")
    }
}

impl std::error::Error for Closed {}

/// A server keeping its tables in memory, keyed by their qualified name.
#[derive(Debug, Default)]
struct MemoryDb {
    tables: Mutex<HashMap<String, Vec<User>>>,
    closed: AtomicBool,
}

impl MemoryDb {
    fn create_table(&self, name: String) -> Result<(), Closed> {
        self.check_open()?;
        self.tables.lock().insert(name, Vec::new());
        Ok(())
    }

    fn insert(&self, table: &str, user: User) -> Result<(), BoxError> {
        self.check_open()?;
        self.tables
            .lock()
            .get_mut(table)
            .ok_or_else(|| format!("no such table: {table}"))?
            .push(user);
        Ok(())
    }

    fn select(&self, table: &str, filter: impl Fn(&User) -> bool) -> Result<Vec<User>, BoxError> {
        self.check_open()?;
        let tables = self.tables.lock();
        let rows = tables.get(table).ok_or_else(|| format!("no such table: {table}"))?;
        Ok(rows.iter().filter(|user| filter(user)).cloned().collect())
    }

    fn check_open(&self) -> Result<(), Closed> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Closed)
        } else {
            Ok(())
        }
    }
}

impl Server for MemoryDb {
    type Error = Closed;

    fn close(&self) -> Result<(), Closed> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Closed);
        }
        Ok(())
    }
}

lazy_static! {
    static ref SERVERS: Vec<Arc<MemoryDb>> = (0..16).map(|_| Arc::new(MemoryDb::default())).collect();
}

fn create_schema(shard: &Shard<MemoryDb>) -> Result<(), BoxError> {
    shard.server().create_table(shard.render("?SHARD.users")?)?;
    Ok(())
}

/// Places a user on the shard of its account and assigns it an ID.
fn create_user(cluster: &Cluster<MemoryDb>, account_id: i64, name: &str) -> Result<User, BoxError> {
    let shard = cluster.shard(account_id);
    let user = User {
        id: shard.id_gen().next_now(),
        account_id,
        name: name.to_owned(),
    };
    shard.server().insert(&shard.render("?SHARD.users")?, user.clone())?;
    Ok(user)
}

/// Finds a user by looking up the shard embedded in its ID.
fn get_user(cluster: &Cluster<MemoryDb>, id: i64) -> Result<Option<User>, BoxError> {
    let shard = cluster.shard_by_id(id);
    let users = shard.server().select(&shard.render("?SHARD.users")?, |user| user.id == id)?;
    Ok(users.into_iter().next())
}

fn get_users(cluster: &Cluster<MemoryDb>, account_id: i64) -> Result<Vec<User>, BoxError> {
    let shard = cluster.shard(account_id);
    shard
        .server()
        .select(&shard.render("?SHARD.users")?, |user| user.account_id == account_id)
}

#[test]
fn users_are_sharded_by_account() {
    let db = Arc::new(MemoryDb::default());
    let cluster = Cluster::new(vec![db.clone()], 2).unwrap();
    cluster.for_each_shard(create_schema).unwrap();

    // Account 1 lives on shard1, account 2 on shard0
    let user1 = create_user(&cluster, 1, "user1").unwrap();
    let user2 = create_user(&cluster, 1, "user2").unwrap();
    let user3 = create_user(&cluster, 2, "user3").unwrap();

    assert_eq!(1, cluster.shard_by_id(user1.id).id());
    assert_eq!(1, cluster.shard_by_id(user2.id).id());
    assert_eq!(0, cluster.shard_by_id(user3.id).id());
    assert_ne!(user1.id, user2.id);

    assert_eq!(Some(user1.clone()), get_user(&cluster, user1.id).unwrap());
    assert_eq!(Some(user3.clone()), get_user(&cluster, user3.id).unwrap());
    assert_eq!(vec![user1, user2], get_users(&cluster, 1).unwrap());
    assert_eq!(vec![user3], get_users(&cluster, 2).unwrap());

    {
        let tables = db.tables.lock();
        assert_eq!(2, tables["shard1.users"].len());
        assert_eq!(1, tables["shard0.users"].len());
    }

    cluster.close().unwrap();
    assert!(create_user(&cluster, 1, "user4").is_err());
    // Closing twice doesn't touch the servers again
    cluster.close().unwrap();
}

#[test]
fn users_spread_over_servers() {
    let dbs: Vec<_> = (0..4).map(|_| Arc::new(MemoryDb::default())).collect();
    let cluster = Cluster::new(dbs.clone(), 16).unwrap();
    cluster.for_each_n_shards(2, create_schema).unwrap();

    let users: Vec<User> = (0..64)
        .map(|account_id| create_user(&cluster, account_id, &format!("user{account_id}")).unwrap())
        .collect();
    for user in &users {
        assert_eq!(Some(user.clone()), get_user(&cluster, user.id).unwrap());
        let server = (user.account_id % 4) as usize;
        assert!(Arc::ptr_eq(&dbs[server], cluster.shard_by_id(user.id).server()));
    }
    for db in &dbs {
        let tables = db.tables.lock();
        assert_eq!(4, tables.len());
        assert_eq!(16, tables.values().map(Vec::len).sum::<usize>());
    }
}

#[test]
fn missing_schema_fails_fan_out() {
    let cluster = Cluster::new(vec![Arc::new(MemoryDb::default())], 4).unwrap();
    let result = cluster.for_each_shard(|shard| {
        shard.server().select(&shard.render("?SHARD.users")?, |_| true)?;
        Ok(())
    });
    match result {
        Err(Error::FanOut(err)) => assert!(err.to_string().starts_with("no such table: shard")),
        other => panic!("expected a fan-out error, got {other:?}"),
    }
}

#[test]
fn keys_route_like_ids() {
    let cluster = Cluster::new(SERVERS[..4].to_vec(), 8).unwrap();
    let keys = KeyGen::new();
    for shard in cluster.all_shards() {
        let key = keys.generate(shard.id(), Utc::now());
        assert_eq!(shard.id(), cluster.shard(key.shard() as i64).id());
    }
}

#[test]
fn shards_are_distributed_across_servers() {
    let tests: &[(&[usize], usize, &[u64])] = &[
        (&[0], 0, &[0, 1, 2, 3, 4, 5, 6, 7]),
        (&[0, 1], 0, &[0, 2, 4, 6]),
        (&[0, 1], 1, &[1, 3, 5, 7]),
        (&[0, 1, 2, 1], 0, &[0, 4]),
        (&[0, 1, 2, 1], 1, &[1, 3, 5, 7]),
        (&[0, 1, 2, 1], 2, &[2, 6]),
        (&[0, 1, 2, 3], 0, &[0, 4]),
        (&[0, 1, 2, 3], 1, &[1, 5]),
        (&[0, 1, 2, 3], 2, &[2, 6]),
        (&[0, 1, 2, 3], 3, &[3, 7]),
    ];

    for &(dbs, db, expected) in tests {
        let cluster = Cluster::new(dbs.iter().map(|&index| SERVERS[index].clone()).collect(), 8).unwrap();
        let shards: Vec<u64> = cluster.shards(Some(&SERVERS[db])).iter().map(|shard| shard.id()).collect();
        assert_eq!(expected, shards.as_slice(), "dbs {dbs:?}, db {db}");
    }
}

#[test]
fn sub_clusters_touch_few_servers() {
    let cluster = Cluster::new(SERVERS.clone(), 64).unwrap();
    let sub = cluster.sub_cluster(3, 4);
    let ids: Vec<u64> = sub.shards().iter().map(Shard::id).collect();
    assert_eq!(vec![12, 13, 14, 15], ids);

    let servers = Mutex::new(Vec::new());
    sub.for_each_shard(|shard| {
        servers.lock().push(Arc::as_ptr(shard.server()) as usize);
        Ok(())
    })
    .unwrap();
    let mut servers = servers.into_inner();
    servers.sort_unstable();
    servers.dedup();
    assert_eq!(4, servers.len());
}

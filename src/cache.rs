//! Per-user subject cache: `user -> (subject, expiry)` with a configurable
//! TTL and single-flight on miss (at most one directory lookup per user
//! in-flight at a time).
//!
//! Single-flight is implemented with a per-user `tokio::sync::Mutex`: all
//! concurrent callers for the same user queue on that lock, the first one
//! through does the directory call and populates the cache, everyone else
//! wakes up to a warm entry. The outer `entries`/`locks` maps themselves are
//! guarded by a synchronous [`parking_lot::Mutex`] since access to them is
//! always a quick map lookup, never something that should hold an async
//! lock across an await point.

use crate::error::BrokerResult;
use crate::id::UserId;
use crate::ports::DirectoryPort;
use crate::subject::Subject;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

struct Entry {
    subject: Subject,
    expires_at: DateTime<Utc>,
}

pub struct SubjectCache {
    ttl: Duration,
    entries: Mutex<HashMap<UserId, Entry>>,
    locks: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SubjectCache {
    pub fn new(ttl: Duration) -> Self {
        SubjectCache {
            ttl,
            entries: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve `user`'s subject, either from a live cache entry or by
    /// calling `directory` exactly once even if several callers race on the
    /// same user.
    pub async fn get(&self, user: &UserId, directory: &dyn DirectoryPort, now: DateTime<Utc>) -> BrokerResult<Subject> {
        if let Some(subject) = self.peek(user, now) {
            return Ok(subject);
        }

        let per_user_lock = {
            let mut locks = self.locks.lock();
            locks.entry(user.clone()).or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))).clone()
        };
        let _guard = per_user_lock.lock().await;

        // Re-check: another caller may have populated the entry while we
        // were waiting for the per-user lock.
        if let Some(subject) = self.peek(user, now) {
            return Ok(subject);
        }

        let groups = directory.groups_for(user).await?;
        let subject = Subject::resolve(user.clone(), &groups);
        self.entries.lock().insert(
            user.clone(),
            Entry {
                subject: subject.clone(),
                expires_at: now + self.ttl,
            },
        );
        Ok(subject)
    }

    fn peek(&self, user: &UserId, now: DateTime<Utc>) -> Option<Subject> {
        let entries = self.entries.lock();
        let entry = entries.get(user)?;
        (entry.expires_at > now).then(|| entry.subject.clone())
    }

    pub fn invalidate(&self, user: &UserId) {
        self.entries.lock().remove(user);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::DirectoryGroup;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingDirectory {
        calls: AtomicU32,
    }

    #[async_trait]
    impl DirectoryPort for CountingDirectory {
        async fn groups_for(&self, _user: &UserId) -> BrokerResult<Vec<DirectoryGroup>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![DirectoryGroup {
                email: "approvers@example.com".to_string(),
                expires_at: None,
            }])
        }
    }

    #[tokio::test]
    async fn caches_within_ttl() {
        let cache = SubjectCache::new(Duration::minutes(1));
        let directory = CountingDirectory { calls: AtomicU32::new(0) };
        let user = UserId::new("alice@example.com");
        let now = Utc::now();
        cache.get(&user, &directory, now).await.unwrap();
        cache.get(&user, &directory, now + Duration::seconds(30)).await.unwrap();
        assert_eq!(directory.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recomputes_after_ttl_expiry() {
        let cache = SubjectCache::new(Duration::minutes(1));
        let directory = CountingDirectory { calls: AtomicU32::new(0) };
        let user = UserId::new("alice@example.com");
        let now = Utc::now();
        cache.get(&user, &directory, now).await.unwrap();
        cache.get(&user, &directory, now + Duration::minutes(2)).await.unwrap();
        assert_eq!(directory.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn single_flight_collapses_concurrent_misses() {
        let cache = Arc::new(SubjectCache::new(Duration::minutes(1)));
        let directory = Arc::new(CountingDirectory { calls: AtomicU32::new(0) });
        let user = UserId::new("alice@example.com");
        let now = Utc::now();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let directory = directory.clone();
            let user = user.clone();
            handles.push(tokio::spawn(async move { cache.get(&user, directory.as_ref(), now).await.unwrap() }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(directory.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_recompute() {
        let cache = SubjectCache::new(Duration::minutes(1));
        let directory = CountingDirectory { calls: AtomicU32::new(0) };
        let user = UserId::new("alice@example.com");
        let now = Utc::now();
        cache.get(&user, &directory, now).await.unwrap();
        cache.invalidate(&user);
        cache.get(&user, &directory, now).await.unwrap();
        assert_eq!(directory.calls.load(Ordering::SeqCst), 2);
    }
}

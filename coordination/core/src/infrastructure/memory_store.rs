// Copyright (c) 2026 Concord Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # In-Memory Coordination Store
//!
//! Process-local [`CoordinationStore`] backend for development and testing.
//! Mirrors the semantics a remote data-structure server provides: per-key
//! expiry, typed values (string, set, sorted set, list), conditional set
//! and conditional delete. Expired entries are dropped lazily on access and
//! eagerly by [`MemoryStore::purge_expired`].

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use crate::domain::store::{CoordinationStore, StoreError};

#[derive(Debug, Clone)]
enum StoredValue {
    Str(String),
    Set(HashSet<String>),
    /// Kept ordered by (score, member) on every insert.
    Sorted(Vec<(f64, String)>),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: StoredValue) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory store backend.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

/// Resolve an inclusive, possibly-negative index range against `len`.
/// Returns `None` when the range selects nothing.
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let n = len as isize;
    let clamp = |i: isize| -> isize {
        if i < 0 {
            (n + i).max(0)
        } else {
            i.min(n - 1)
        }
    };
    let start = clamp(start);
    let stop = clamp(stop);
    if start > stop {
        return None;
    }
    Some((start as usize, stop as usize))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        before - entries.len()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.entries.read().values().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_str(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if entry.is_expired() => Ok(None),
            Some(entry) => match &entry.value {
                StoredValue::Str(s) => Ok(Some(s.clone())),
                _ => Err(StoreError::WrongType {
                    key: key.to_string(),
                }),
            },
            None => Ok(None),
        }
    }

    /// Mutate (creating if needed) the typed collection at `key`. An
    /// expired entry is replaced by a fresh one before the mutation runs.
    fn with_value<T>(
        &self,
        key: &str,
        make: impl Fn() -> StoredValue,
        f: impl FnOnce(&mut StoredValue) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut entries = self.entries.write();
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry::new(make()));
        if entry.is_expired() {
            *entry = Entry::new(make());
        }
        f(&mut entry.value)
    }

    /// Read-only access to the typed collection at `key`; `default` is
    /// returned for missing or expired keys.
    fn read_value<T>(
        &self,
        key: &str,
        default: T,
        f: impl FnOnce(&StoredValue) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if entry.is_expired() => Ok(default),
            Some(entry) => f(&entry.value),
            None => Ok(default),
        }
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.read_str(key)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .write()
            .insert(key.to_string(), Entry::new(StoredValue::Str(value.to_string())));
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut entry = Entry::new(StoredValue::Str(value.to_string()));
        entry.expires_at = Some(Instant::now() + ttl);
        self.entries.write().insert(key.to_string(), entry);
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.write();
        let live = entries.get(key).is_some_and(|e| !e.is_expired());
        if live {
            return Ok(false);
        }
        let mut entry = Entry::new(StoredValue::Str(value.to_string()));
        entry.expires_at = Some(Instant::now() + ttl);
        entries.insert(key.to_string(), entry);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let removed = self.entries.write().remove(key);
        Ok(removed.is_some_and(|e| !e.is_expired()))
    }

    async fn delete_if_value(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.write();
        let matches = match entries.get(key) {
            Some(entry) if entry.is_expired() => false,
            Some(entry) => matches!(&entry.value, StoredValue::Str(s) if s == expected),
            None => false,
        };
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.with_value(
            key,
            || StoredValue::Str("0".to_string()),
            |value| match value {
                StoredValue::Str(s) => {
                    let current: i64 = s.parse().map_err(|_| wrong_type(key))?;
                    let next = current + delta;
                    *s = next.to_string();
                    Ok(next)
                }
                _ => Err(wrong_type(key)),
            },
        )
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.with_value(
            key,
            || StoredValue::Set(HashSet::new()),
            |value| match value {
                StoredValue::Set(set) => Ok(set.insert(member.to_string())),
                _ => Err(wrong_type(key)),
            },
        )
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(entry) if entry.is_expired() => Ok(false),
            Some(entry) => match &mut entry.value {
                StoredValue::Set(set) => Ok(set.remove(member)),
                _ => Err(wrong_type(key)),
            },
            None => Ok(false),
        }
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.read_value(key, Vec::new(), |value| match value {
            StoredValue::Set(set) => Ok(set.iter().cloned().collect()),
            _ => Err(wrong_type(key)),
        })
    }

    async fn set_len(&self, key: &str) -> Result<usize, StoreError> {
        self.read_value(key, 0, |value| match value {
            StoredValue::Set(set) => Ok(set.len()),
            _ => Err(wrong_type(key)),
        })
    }

    async fn sorted_add(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        self.with_value(
            key,
            || StoredValue::Sorted(Vec::new()),
            |value| match value {
                StoredValue::Sorted(items) => {
                    items.retain(|(_, m)| m != member);
                    let position = items
                        .partition_point(|(s, m)| {
                            (*s, m.as_str()) < (score, member)
                        });
                    items.insert(position, (score, member.to_string()));
                    Ok(())
                }
                _ => Err(wrong_type(key)),
            },
        )
    }

    async fn sorted_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(entry) if entry.is_expired() => Ok(false),
            Some(entry) => match &mut entry.value {
                StoredValue::Sorted(items) => {
                    let before = items.len();
                    items.retain(|(_, m)| m != member);
                    Ok(items.len() != before)
                }
                _ => Err(wrong_type(key)),
            },
            None => Ok(false),
        }
    }

    async fn sorted_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        self.read_value(key, Vec::new(), |value| match value {
            StoredValue::Sorted(items) => {
                let Some((start, stop)) = resolve_range(items.len(), start, stop) else {
                    return Ok(Vec::new());
                };
                Ok(items[start..=stop].iter().map(|(_, m)| m.clone()).collect())
            }
            _ => Err(wrong_type(key)),
        })
    }

    async fn sorted_score(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError> {
        self.read_value(key, None, |value| match value {
            StoredValue::Sorted(items) => {
                Ok(items.iter().find(|(_, m)| m == member).map(|(s, _)| *s))
            }
            _ => Err(wrong_type(key)),
        })
    }

    async fn sorted_len(&self, key: &str) -> Result<usize, StoreError> {
        self.read_value(key, 0, |value| match value {
            StoredValue::Sorted(items) => Ok(items.len()),
            _ => Err(wrong_type(key)),
        })
    }

    async fn list_push_front(&self, key: &str, value: &str) -> Result<usize, StoreError> {
        self.with_value(
            key,
            || StoredValue::List(VecDeque::new()),
            |stored| match stored {
                StoredValue::List(list) => {
                    list.push_front(value.to_string());
                    Ok(list.len())
                }
                _ => Err(wrong_type(key)),
            },
        )
    }

    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(entry) if entry.is_expired() => Ok(()),
            Some(entry) => match &mut entry.value {
                StoredValue::List(list) => {
                    match resolve_range(list.len(), start, stop) {
                        Some((start, stop)) => {
                            let kept: VecDeque<String> =
                                list.iter().skip(start).take(stop - start + 1).cloned().collect();
                            *list = kept;
                        }
                        None => list.clear(),
                    }
                    Ok(())
                }
                _ => Err(wrong_type(key)),
            },
            None => Ok(()),
        }
    }

    async fn list_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        self.read_value(key, Vec::new(), |value| match value {
            StoredValue::List(list) => {
                let Some((start, stop)) = resolve_range(list.len(), start, stop) else {
                    return Ok(Vec::new());
                };
                Ok(list.iter().skip(start).take(stop - start + 1).cloned().collect())
            }
            _ => Err(wrong_type(key)),
        })
    }

    async fn list_len(&self, key: &str) -> Result<usize, StoreError> {
        self.read_value(key, 0, |value| match value {
            StoredValue::List(list) => Ok(list.len()),
            _ => Err(wrong_type(key)),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(entry) if entry.is_expired() => Ok(false),
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if entry.is_expired() => Ok(None),
            Some(entry) => Ok(entry
                .expires_at
                .map(|at| at.saturating_duration_since(Instant::now()))),
            None => Ok(None),
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.read();
        Ok(entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect())
    }
}

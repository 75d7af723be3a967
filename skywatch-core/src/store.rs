//! Schedule store (C5): an in-memory, priority-ordered event list with a
//! durable, atomically-rewritten JSON snapshot.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::model::{Schedule, Target};

/// On-disk wire format for one schedule entry. `targets` is a 3-tuple of
/// parallel columns `(names, ra_deg, dec_deg)` rather than an array of
/// objects, matching the self-describing snapshot schema the store commits
/// to (not a language-specific serialization).
#[derive(Debug, Serialize, Deserialize)]
struct WireSchedule {
    name: String,
    targets: (Vec<String>, Vec<f64>, Vec<f64>),
    priority: i32,
    expiration: Option<DateTime<Utc>>,
}

impl From<&Schedule> for WireSchedule {
    fn from(schedule: &Schedule) -> Self {
        let names = schedule.targets.iter().map(|t| t.name.clone()).collect();
        let ra = schedule.targets.iter().map(|t| t.ra_deg).collect();
        let dec = schedule.targets.iter().map(|t| t.dec_deg).collect();
        Self {
            name: schedule.name.clone(),
            targets: (names, ra, dec),
            priority: schedule.priority,
            expiration: schedule.expiration,
        }
    }
}

impl WireSchedule {
    fn into_schedule(self) -> Result<Schedule, String> {
        let (names, ra, dec) = self.targets;
        if names.len() != ra.len() || ra.len() != dec.len() {
            return Err(format!(
                "schedule {} has mismatched target column lengths",
                self.name
            ));
        }
        let targets = names
            .into_iter()
            .zip(ra)
            .zip(dec)
            .map(|((name, ra_deg), dec_deg)| Target { name, ra_deg, dec_deg })
            .collect();
        Ok(Schedule {
            name: self.name,
            targets,
            priority: self.priority,
            expiration: self.expiration,
        })
    }
}

struct State {
    entries: Vec<Schedule>,
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State").field("entries", &self.entries.len()).finish()
    }
}

/// A durable, priority-ordered queue of event schedules.
///
/// Invariants: no two entries share a `name` (I1); expired entries are
/// dropped before any read (I2); the on-disk snapshot is byte-identical to
/// the in-memory state after every mutation (I3).
pub struct EventStore {
    state: Mutex<State>,
    snapshot_path: PathBuf,
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.state.try_lock() {
            Ok(state) => f
                .debug_struct("EventStore")
                .field("snapshot_path", &self.snapshot_path)
                .field("state", &*state)
                .finish(),
            Err(_) => f
                .debug_struct("EventStore")
                .field("snapshot_path", &self.snapshot_path)
                .field("state", &"<locked>")
                .finish(),
        }
    }
}

impl EventStore {
    /// Loads the snapshot at `snapshot_path`, tolerating a missing file
    /// (empty store) or a corrupt one (logged, empty store) — never fails.
    pub async fn load(snapshot_path: impl Into<PathBuf>) -> Self {
        let snapshot_path = snapshot_path.into();
        let entries = match tokio::fs::read_to_string(&snapshot_path).await {
            Ok(text) => match serde_json::from_str::<Vec<WireSchedule>>(&text) {
                Ok(wire) => {
                    let mut entries = Vec::with_capacity(wire.len());
                    let mut corrupt = false;
                    for w in wire {
                        match w.into_schedule() {
                            Ok(schedule) => entries.push(schedule),
                            Err(err) => {
                                tracing::error!(error = %err, "corrupt snapshot entry, starting empty");
                                corrupt = true;
                                break;
                            }
                        }
                    }
                    if corrupt {
                        Vec::new()
                    } else {
                        entries
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, path = %snapshot_path.display(), "corrupt snapshot, starting empty");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        Self {
            state: Mutex::new(State { entries }),
            snapshot_path,
        }
    }

    /// Adds `schedule`, replacing any existing entry with the same `name` in
    /// place (I1), then drops expired entries, re-sorts by descending
    /// priority (stable), and atomically rewrites the snapshot.
    pub async fn add(&self, schedule: Schedule, at: DateTime<Utc>) -> crate::error::Result<()> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.entries.iter_mut().find(|e| e.name == schedule.name) {
            *existing = schedule;
        } else {
            state.entries.push(schedule);
        }
        state.entries.retain(|e| !e.is_expired(at));
        state.entries.sort_by(|a, b| b.priority.cmp(&a.priority));
        self.persist(&state.entries).await
    }

    /// Drops all entries whose expiration is in the past and rewrites the
    /// snapshot.
    pub async fn remove_expired(&self, at: DateTime<Utc>) -> crate::error::Result<()> {
        let mut state = self.state.lock().await;
        state.entries.retain(|e| !e.is_expired(at));
        self.persist(&state.entries).await
    }

    /// Entries in current priority order (descending, insertion-order ties).
    pub async fn iter_by_priority(&self) -> Vec<Schedule> {
        self.state.lock().await.entries.clone()
    }

    async fn persist(&self, entries: &[Schedule]) -> crate::error::Result<()> {
        let wire: Vec<WireSchedule> = entries.iter().map(WireSchedule::from).collect();
        let json = serde_json::to_string_pretty(&wire)?;
        write_atomic(&self.snapshot_path, &json).await
    }
}

async fn write_atomic(path: &Path, contents: &str) -> crate::error::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir).await?;
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, contents).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn schedule(name: &str, priority: i32) -> Schedule {
        Schedule::host(name, vec![Target::new("t", 1.0, 2.0)]).tap_priority(priority)
    }

    // small test-only helper since Schedule::host always sets priority 0
    trait TapPriority {
        fn tap_priority(self, priority: i32) -> Schedule;
    }
    impl TapPriority for Schedule {
        fn tap_priority(mut self, priority: i32) -> Schedule {
            self.priority = priority;
            self
        }
    }

    #[tokio::test]
    async fn missing_snapshot_yields_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::load(dir.path().join("missing.json")).await;
        assert!(store.iter_by_priority().await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_snapshot_yields_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        tokio::fs::write(&path, "not json").await.unwrap();
        let store = EventStore::load(&path).await;
        assert!(store.iter_by_priority().await.is_empty());
    }

    #[tokio::test]
    async fn add_replaces_same_name_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let store = EventStore::load(&path).await;
        let at = Utc::now();
        store.add(schedule("grace-1", 1), at).await.unwrap();
        store.add(schedule("grace-1", 2), at).await.unwrap();
        let entries = store.iter_by_priority().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].priority, 2);
    }

    #[tokio::test]
    async fn entries_sorted_by_descending_priority() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let store = EventStore::load(&path).await;
        let at = Utc::now();
        store.add(schedule("low", 1), at).await.unwrap();
        store.add(schedule("high", 5), at).await.unwrap();
        let entries = store.iter_by_priority().await;
        assert_eq!(entries[0].name, "high");
        assert_eq!(entries[1].name, "low");
    }

    #[tokio::test]
    async fn snapshot_round_trips_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let at = Utc::now();
        {
            let store = EventStore::load(&path).await;
            store.add(schedule("a", 3), at).await.unwrap();
            store.add(schedule("b", 1), at).await.unwrap();
        }
        let reloaded = EventStore::load(&path).await;
        let entries = reloaded.iter_by_priority().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a");
    }

    #[tokio::test]
    async fn remove_expired_drops_past_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let store = EventStore::load(&path).await;
        let now = Utc::now();
        let mut expired = schedule("old", 1);
        expired.expiration = Some(now - Duration::minutes(5));
        store.add(expired, now).await.unwrap();
        store.remove_expired(now).await.unwrap();
        assert!(store.iter_by_priority().await.is_empty());
    }
}

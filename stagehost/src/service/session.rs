//! Request sessions and their working directories.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Opaque identifier.
    pub id: String,
    /// Working directory; every file of the session lives below it.
    pub dir: PathBuf,
}

#[derive(Debug)]
struct Entry {
    dir: PathBuf,
    last_access: Instant,
    in_use: usize,
}

impl Entry {
    fn is_expired(&self, now: Instant, expiration: Duration) -> bool {
        self.in_use == 0 && now.saturating_duration_since(self.last_access) > expiration
    }
}

/// A session directory taken out of the store, waiting to be deleted.
#[derive(Debug)]
struct Expired {
    id: String,
    dir: PathBuf,
}

/// Creates, reuses and expires sessions.
///
/// Ids are random v4 uuids; an expired or unknown id presented by a client
/// gets a fresh session instead. A session is never expired while a
/// [`SessionLease`] on it is alive. Directories are deleted outside the lock.
pub struct SessionStore {
    root: PathBuf,
    expiration: Duration,
    sessions: Mutex<HashMap<String, Entry>>,
}

/// A session held by a running request.
///
/// Dropping the lease touches the session, so its idle time starts when the
/// request finishes.
pub struct SessionLease {
    store: Arc<SessionStore>,
    session: Session,
}

impl SessionLease {
    /// The leased session.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }
}

impl Deref for SessionLease {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.store.release(&self.session.id);
    }
}

impl fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionLease").field(&self.session).finish()
    }
}

impl SessionStore {
    /// Creates a store keeping working directories under `root`.
    pub fn new(root: impl Into<PathBuf>, expiration: Duration) -> Self {
        Self {
            root: root.into(),
            expiration,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Directory holding the session directories.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Leases the session for `requested` if it is live, otherwise a new one.
    ///
    /// Makes sure the session directory exists.
    pub fn acquire(self: &Arc<Self>, requested: Option<&str>) -> std::io::Result<SessionLease> {
        let (session, stale) = self.open(requested, Instant::now());
        if let Some(stale) = stale {
            remove_directories(&[stale]);
        }
        let session = session?;
        Ok(SessionLease {
            store: Arc::clone(self),
            session,
        })
    }

    fn open(&self, requested: Option<&str>, now: Instant) -> (std::io::Result<Session>, Option<Expired>) {
        let mut sessions = self.sessions.lock();
        let mut stale = None;

        if let Some(id) = requested.filter(|id| !id.is_empty()) {
            match sessions.get_mut(id) {
                Some(entry) if !entry.is_expired(now, self.expiration) => {
                    entry.last_access = now;
                    entry.in_use += 1;
                    let session = Session {
                        id: id.to_string(),
                        dir: entry.dir.clone(),
                    };
                    if let Err(e) = std::fs::create_dir_all(&session.dir) {
                        entry.in_use -= 1;
                        return (Err(e), None);
                    }
                    return (Ok(session), None);
                }
                Some(_) => {
                    stale = sessions.remove(id).map(|entry| Expired {
                        id: id.to_string(),
                        dir: entry.dir,
                    });
                }
                None => {}
            }
            debug!(session = id, "Unknown or expired session, creating a new one");
        }

        let id = loop {
            let candidate = Uuid::new_v4().simple().to_string();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        let dir = self.root.join(&id);
        if let Err(e) = std::fs::create_dir_all(&dir) {
            return (Err(e), stale);
        }
        sessions.insert(
            id.clone(),
            Entry {
                dir: dir.clone(),
                last_access: now,
                in_use: 1,
            },
        );
        info!(session = %id, "Session created");
        (Ok(Session { id, dir }), stale)
    }

    fn release(&self, id: &str) {
        if let Some(entry) = self.sessions.lock().get_mut(id) {
            entry.in_use = entry.in_use.saturating_sub(1);
            entry.last_access = Instant::now();
        }
    }

    /// Working directory of a live session, without touching it.
    #[must_use]
    pub fn directory(&self, id: &str) -> Option<PathBuf> {
        self.sessions.lock().get(id).map(|entry| entry.dir.clone())
    }

    /// Removes every idle session unused for longer than the expiration time.
    ///
    /// Returns the number of sessions removed.
    pub fn sweep(&self) -> usize {
        let expired = self.take_expired(Instant::now());
        remove_directories(&expired);
        expired.len()
    }

    fn take_expired(&self, now: Instant) -> Vec<Expired> {
        let mut sessions = self.sessions.lock();
        let ids: Vec<String> = sessions
            .iter()
            .filter(|(_, entry)| entry.is_expired(now, self.expiration))
            .map(|(id, _)| id.clone())
            .collect();
        let expired: Vec<Expired> = ids
            .into_iter()
            .filter_map(|id| sessions.remove(&id).map(|entry| Expired { id, dir: entry.dir }))
            .collect();
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired sessions removed");
        }
        expired
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Returns true if no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts the background sweep. Directories are deleted on the blocking pool.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let sweeping = Arc::clone(&store);
                if let Err(e) = tokio::task::spawn_blocking(move || sweeping.sweep()).await {
                    warn!("Session sweep failed: {e}");
                }
            }
        })
    }
}

fn remove_directories(expired: &[Expired]) {
    for session in expired {
        if let Err(e) = std::fs::remove_dir_all(&session.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(session = %session.id, "Failed to remove session directory: {e}");
            }
        }
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("root", &self.root)
            .field("expiration", &self.expiration)
            .field("live", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store(root: &Path, expiration: Duration) -> Arc<SessionStore> {
        Arc::new(SessionStore::new(root, expiration))
    }

    #[test]
    fn test_new_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), Duration::from_secs(60));

        let first = store.acquire(None).unwrap();
        assert!(first.dir.is_dir());
        assert!(first.dir.starts_with(dir.path()));

        let again = store.acquire(Some(&first.id)).unwrap();
        assert_eq!(again.session(), first.session());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unknown_id_gets_fresh_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), Duration::from_secs(60));
        let session = store.acquire(Some("made-up")).unwrap();
        assert_ne!(session.id, "made-up");
    }

    #[test]
    fn test_sessions_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), Duration::from_secs(60));
        let a = store.acquire(None).unwrap();
        let b = store.acquire(None).unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(a.dir, b.dir);
    }

    #[test]
    fn test_sweep_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), Duration::from_millis(10));
        let session = store.acquire(None).unwrap().session().clone();
        std::fs::write(session.dir.join("out.txt"), "x").unwrap();

        let expired = store.take_expired(Instant::now() + Duration::from_secs(1));
        assert_eq!(expired.len(), 1);
        assert!(store.is_empty());
        remove_directories(&expired);
        assert!(!session.dir.exists());

        let next = store.acquire(Some(&session.id)).unwrap();
        assert_ne!(next.id, session.id);
    }

    #[test]
    fn test_directories_removed_after_lock_released() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), Duration::from_millis(10));
        let session = store.acquire(None).unwrap().session().clone();

        let expired = store.take_expired(Instant::now() + Duration::from_secs(1));
        assert!(session.dir.exists());
        let other = store.acquire(None).unwrap();
        assert!(other.dir.is_dir());

        remove_directories(&expired);
        assert!(!session.dir.exists());
        assert!(other.dir.is_dir());
    }

    #[test]
    fn test_sweep_skips_sessions_in_use() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), Duration::from_millis(10));
        let lease = store.acquire(None).unwrap();

        assert!(store.take_expired(Instant::now() + Duration::from_secs(1)).is_empty());
        assert_eq!(store.directory(&lease.id), Some(lease.dir.clone()));

        let id = lease.id.clone();
        drop(lease);
        assert_eq!(store.take_expired(Instant::now() + Duration::from_secs(1)).len(), 1);
        assert!(store.directory(&id).is_none());
    }

    #[test]
    fn test_release_restarts_idle_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), Duration::from_millis(100));
        let lease = store.acquire(None).unwrap();
        let id = lease.id.clone();

        std::thread::sleep(Duration::from_millis(150));
        drop(lease);
        assert_eq!(store.sweep(), 0);
        let again = store.acquire(Some(&id)).unwrap();
        assert_eq!(again.id, id);
    }

    #[test]
    fn test_expired_on_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), Duration::ZERO);
        let session = store.acquire(None).unwrap().session().clone();
        std::thread::sleep(Duration::from_millis(5));
        let next = store.acquire(Some(&session.id)).unwrap();
        assert_ne!(next.id, session.id);
        assert!(store.directory(&session.id).is_none());
        assert!(!session.dir.exists());
    }

    #[test]
    fn test_bookkeeping_bounded_after_repeated_sweeps() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), Duration::from_millis(1));
        for _ in 0..50 {
            let session = store.acquire(None).unwrap().session().clone();
            let later = Instant::now() + Duration::from_secs(1);
            remove_directories(&store.take_expired(later));
            assert!(store.directory(&session.id).is_none());
        }
        assert!(store.sessions.lock().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_background_sweeper() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), Duration::ZERO);
        drop(store.acquire(None).unwrap());
        std::thread::sleep(Duration::from_millis(2));

        let handle = store.spawn_sweeper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.is_empty());
        handle.abort();
    }
}

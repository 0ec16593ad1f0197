//! Connection registry.
//!
//! All table reads and writes (add, update, remove, iterate-for-reap)
//! happen under one lock. Read tasks and the reaper run on different
//! runtime threads; the lock serializes them, and entries are never
//! visible outside the table while being added or removed.

use crate::stream::ServerStream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::WriteHalf;

/// Public snapshot of one tracked connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: u64,
    pub remote_addr: SocketAddr,
    pub connected: bool,
    pub idle: Duration,
}

/// One tracked connection. Cheap to clone: the writer and flags are
/// shared with the connection's read task.
#[derive(Clone)]
pub(crate) struct ConnectionEntry {
    pub id: u64,
    pub remote_addr: SocketAddr,
    pub writer: Arc<tokio::sync::Mutex<WriteHalf<ServerStream>>>,
    connected: Arc<AtomicBool>,
    last_activity: Arc<Mutex<Instant>>,
}

impl ConnectionEntry {
    fn new(id: u64, remote_addr: SocketAddr, writer: WriteHalf<ServerStream>) -> Self {
        Self {
            id,
            remote_addr,
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            connected: Arc::new(AtomicBool::new(true)),
            last_activity: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Records activity, deferring idle eviction.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Flags the connection dead. The entry stays in the table until the
    /// reaper's next sweep; removal is never done from the read path.
    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            remote_addr: self.remote_addr,
            connected: self.is_connected(),
            idle: self.idle(),
        }
    }
}

/// The connection table: id-indexed map behind a single lock, plus a
/// monotonic id source. Ids start at 1 and are never reused within a run.
pub(crate) struct Registry {
    table: Mutex<HashMap<u64, ConnectionEntry>>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn insert(
        &self,
        remote_addr: SocketAddr,
        writer: WriteHalf<ServerStream>,
    ) -> ConnectionEntry {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let entry = ConnectionEntry::new(id, remote_addr, writer);
        self.table.lock().insert(id, entry.clone());
        entry
    }

    pub fn get(&self, id: u64) -> Option<ConnectionEntry> {
        self.table.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Removes every dead entry, plus every entry idle past the timeout
    /// when one is given, in one pass under the lock. Returns the removed
    /// entries so the caller can close them outside the lock.
    pub fn sweep(&self, idle_timeout: Option<Duration>) -> Vec<ConnectionEntry> {
        let mut table = self.table.lock();
        let doomed: Vec<u64> = table
            .iter()
            .filter(|(_, entry)| {
                !entry.is_connected() || idle_timeout.is_some_and(|t| entry.idle() > t)
            })
            .map(|(id, _)| *id)
            .collect();
        doomed
            .into_iter()
            .filter_map(|id| table.remove(&id))
            .collect()
    }

    /// Empties the table, returning every entry.
    pub fn drain(&self) -> Vec<ConnectionEntry> {
        self.table.lock().drain().map(|(_, entry)| entry).collect()
    }

    /// Snapshots every tracked connection.
    pub fn infos(&self) -> Vec<ConnectionInfo> {
        self.table.lock().values().map(ConnectionEntry::info).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn writer_pair() -> (WriteHalf<ServerStream>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();
        let (_, writer) = tokio::io::split(ServerStream::Plain { stream: accepted });
        (writer, client)
    }

    fn test_addr() -> SocketAddr {
        "127.0.0.1:4242".parse().unwrap()
    }

    #[tokio::test]
    async fn test_ids_are_monotonic_and_never_reused() {
        let registry = Registry::new();

        let (w1, _c1) = writer_pair().await;
        let (w2, _c2) = writer_pair().await;
        let first = registry.insert(test_addr(), w1);
        let second = registry.insert(test_addr(), w2);
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);

        // removing the newest entry must not free its id
        second.mark_disconnected();
        let removed = registry.sweep(None);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, 2);

        let (w3, _c3) = writer_pair().await;
        let third = registry.insert(test_addr(), w3);
        assert_eq!(third.id, 3);
    }

    #[tokio::test]
    async fn test_sweep_removes_dead_and_idle() {
        let registry = Registry::new();

        let (w1, _c1) = writer_pair().await;
        let (w2, _c2) = writer_pair().await;
        let live = registry.insert(test_addr(), w1);
        let dead = registry.insert(test_addr(), w2);
        dead.mark_disconnected();

        let removed = registry.sweep(Some(Duration::from_secs(60)));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, dead.id);
        assert_eq!(registry.len(), 1);

        // an idle timeout of zero evicts everything that has not just
        // touched
        std::thread::sleep(Duration::from_millis(5));
        let removed = registry.sweep(Some(Duration::from_millis(1)));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, live.id);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_touch_defers_idle_eviction() {
        let registry = Registry::new();
        let (w1, _c1) = writer_pair().await;
        let entry = registry.insert(test_addr(), w1);

        std::thread::sleep(Duration::from_millis(10));
        entry.touch();
        let removed = registry.sweep(Some(Duration::from_millis(5)));
        assert!(removed.is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_drain_and_infos() {
        let registry = Registry::new();
        let (w1, _c1) = writer_pair().await;
        let (w2, _c2) = writer_pair().await;
        registry.insert(test_addr(), w1);
        registry.insert(test_addr(), w2);

        let infos = registry.infos();
        assert_eq!(infos.len(), 2);
        assert!(infos.iter().all(|info| info.connected));

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(registry.len(), 0);
    }
}

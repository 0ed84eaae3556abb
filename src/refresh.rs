//! Periodic registry refresh.
//!
//! Every tick re-reads BridgeDB's SQLite store and the extra-info document,
//! reconciles them and publishes the result. A failed cycle is logged and
//! skipped; the previously published registry keeps serving until the next
//! tick succeeds. The first successful cycle fires a one-shot readiness
//! signal so the HTTP listener only starts once there is something to serve.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{Error, Result};
use crate::registry::extrainfo::parse_extrainfo;
use crate::registry::reconcile::reconcile;
use crate::registry::sql::{load_database, open_database};
use crate::registry::{Registry, RegistryStore};

/// Where the refresher is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    /// No registry published yet.
    Initializing,
    /// At least one registry published; refreshing on the interval.
    Steady,
}

/// Build a fresh registry from both sources.
///
/// The database connection and the file handle live only for their own
/// step and are closed before returning, whether or not the load succeeds.
pub fn load_registry(sqlite_file: &Path, extrainfo_file: &Path) -> Result<Registry> {
    let relational = {
        let conn = open_database(sqlite_file)?;
        load_database(&conn)?
    };

    let parsed = {
        let file = File::open(extrainfo_file).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", extrainfo_file.display(), e),
            ))
        })?;
        parse_extrainfo(BufReader::new(file))?
    };

    Ok(reconcile(relational, &parsed))
}

/// Background task that keeps the [`RegistryStore`] current.
pub struct Refresher {
    sqlite_file: PathBuf,
    extrainfo_file: PathBuf,
    interval: Duration,
    store: RegistryStore,
    state: RefreshState,
}

impl Refresher {
    pub fn new(
        sqlite_file: impl Into<PathBuf>,
        extrainfo_file: impl Into<PathBuf>,
        interval: Duration,
        store: RegistryStore,
    ) -> Self {
        Self {
            sqlite_file: sqlite_file.into(),
            extrainfo_file: extrainfo_file.into(),
            interval,
            store,
            state: RefreshState::Initializing,
        }
    }

    pub fn state(&self) -> RefreshState {
        self.state
    }

    /// Run one load + parse + reconcile + replace cycle. Returns the
    /// published generation. On error nothing is published.
    pub async fn run_cycle(&self) -> Result<u64> {
        let sqlite_file = self.sqlite_file.clone();
        let extrainfo_file = self.extrainfo_file.clone();

        let registry =
            tokio::task::spawn_blocking(move || load_registry(&sqlite_file, &extrainfo_file))
                .await
                .map_err(|e| Error::Task(e.to_string()))??;

        Ok(self.store.replace(registry))
    }

    /// Refresh forever. `ready` fires once, after the first successful
    /// cycle.
    pub async fn run(mut self, ready: oneshot::Sender<()>) {
        let mut ready = Some(ready);
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            sqlite_file = %self.sqlite_file.display(),
            extrainfo_file = %self.extrainfo_file.display(),
            interval_secs = self.interval.as_secs(),
            "Starting bridge refresh loop"
        );

        loop {
            interval.tick().await;

            match self.run_cycle().await {
                Ok(generation) => {
                    if let Some(tx) = ready.take() {
                        self.state = RefreshState::Steady;
                        tracing::info!(generation = generation, "Bridge registry ready");
                        if tx.send(()).is_err() {
                            tracing::debug!("Readiness receiver already dropped");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        parse_error = e.is_parse_error(),
                        state = ?self.state,
                        generation = self.store.generation(),
                        "Bridge refresh failed, keeping previous registry"
                    );
                }
            }
        }
    }

    /// Spawn [`Refresher::run`] on the runtime. The receiver resolves once
    /// the first registry is published.
    pub fn spawn(self) -> (JoinHandle<()>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(self.run(tx));
        (handle, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rusqlite::{params, Connection};
    use tempfile::TempDir;

    const FP_A: &str = "A0EC5B0FC51A5CD800B9D1D16D325636B5755BCE";
    const FP_B: &str = "51502DF3D176CC10C52CC65694205BBA185E0982";

    struct Fixture {
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let conn = Connection::open(dir.path().join("bridgedb.sqlite")).unwrap();
            conn.execute_batch(
                "CREATE TABLE Bridges (
                    id INTEGER PRIMARY KEY NOT NULL,
                    hex_key, address, or_port, distributor, first_seen, last_seen
                );",
            )
            .unwrap();
            for (fp, addr) in [(FP_A, "10.0.0.1"), (FP_B, "10.0.0.2")] {
                conn.execute(
                    "INSERT INTO Bridges (hex_key, address, or_port, distributor, first_seen, last_seen)
                     VALUES (?1, ?2, 9001, 'unallocated', '2020-01-01 00:00', '2020-05-01 12:00')",
                    params![fp, addr],
                )
                .unwrap();
            }

            let fixture = Self { dir };
            fixture.write_extrainfo(&format!(
                "extra-info bar {}\ntransport obfs4 1.2.3.4:1234 cert=XYZ,iat-mode=0\n",
                FP_B
            ));
            fixture
        }

        fn sqlite(&self) -> PathBuf {
            self.dir.path().join("bridgedb.sqlite")
        }

        fn extrainfo(&self) -> PathBuf {
            self.dir.path().join("cached-extrainfo")
        }

        fn write_extrainfo(&self, content: &str) {
            std::fs::write(self.extrainfo(), content).unwrap();
        }

        fn refresher(&self, interval: Duration, store: RegistryStore) -> Refresher {
            Refresher::new(self.sqlite(), self.extrainfo(), interval, store)
        }
    }

    #[test]
    fn test_load_registry_merges_sources() {
        let fixture = Fixture::new();
        let registry = load_registry(&fixture.sqlite(), &fixture.extrainfo()).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.get(FP_A).unwrap().transports.is_empty());
        let b = registry.get(FP_B).unwrap();
        assert_eq!(b.transports.len(), 1);
        assert_eq!(b.transports[0].kind, "obfs4");
        assert_eq!(b.address.to_string(), "10.0.0.2");
    }

    #[test]
    fn test_load_registry_missing_sources() {
        let fixture = Fixture::new();
        assert!(load_registry(Path::new("/this/database/does/not/exist"), &fixture.extrainfo()).is_err());
        assert!(matches!(
            load_registry(&fixture.sqlite(), Path::new("/this/extrainfo/file/does/not/exist")),
            Err(Error::Io(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_load_registry_bogus_extrainfo() {
        let fixture = Fixture::new();
        assert!(load_registry(&fixture.sqlite(), Path::new("/dev/zero")).is_err());
    }

    #[tokio::test]
    async fn test_failed_cycle_keeps_previous_registry() {
        let fixture = Fixture::new();
        let store = RegistryStore::new();
        let refresher = fixture.refresher(Duration::from_secs(3600), store.clone());

        assert_eq!(refresher.run_cycle().await.unwrap(), 1);
        assert_eq!(store.len(), 2);

        fixture.write_extrainfo(&format!("extra-info bar {}\ntransport foo\n", FP_B));
        let err = refresher.run_cycle().await.unwrap_err();
        assert!(err.is_parse_error());

        std::fs::remove_file(fixture.extrainfo()).unwrap();
        assert!(refresher.run_cycle().await.is_err());

        let snapshot = store.snapshot();
        assert_eq!(snapshot.generation, 1);
        assert_eq!(snapshot.registry.get(FP_B).unwrap().transports.len(), 1);
    }

    #[tokio::test]
    async fn test_ready_fires_after_first_success() {
        let fixture = Fixture::new();
        let store = RegistryStore::new();
        let refresher = fixture.refresher(Duration::from_millis(20), store.clone());
        assert_eq!(refresher.state(), RefreshState::Initializing);

        let (handle, ready) = refresher.spawn();
        tokio::time::timeout(Duration::from_secs(5), ready)
            .await
            .expect("readiness timed out")
            .expect("readiness sender dropped");
        assert!(store.is_ready());
        assert_eq!(store.len(), 2);

        // Keeps refreshing after the readiness hand-off.
        tokio::time::timeout(Duration::from_secs(5), async {
            while store.generation() < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("refresh loop stalled");

        handle.abort();
    }

    #[tokio::test]
    async fn test_not_ready_while_sources_fail() {
        let fixture = Fixture::new();
        std::fs::remove_file(fixture.extrainfo()).unwrap();

        let store = RegistryStore::new();
        let (handle, mut ready) = fixture
            .refresher(Duration::from_millis(10), store.clone())
            .spawn();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(ready.try_recv().is_err());
        assert!(!store.is_ready());

        // The schedule is the retry mechanism.
        fixture.write_extrainfo(&format!("extra-info bar {}\n", FP_B));
        tokio::time::timeout(Duration::from_secs(5), ready)
            .await
            .expect("readiness timed out")
            .expect("readiness sender dropped");
        assert!(store.is_ready());

        handle.abort();
    }
}

use crate::cert::CertificateRecord;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

/// Read-only view of the ACME client's certificate directory.
///
/// Every issued certificate lives in `<root>/<cert name>/`. The directory's existence is the only
/// signal that a certificate has been issued; the ACME client owns its contents.
#[derive(Debug, Clone)]
pub struct CertificateStore {
    root: PathBuf,
}

impl CertificateStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn directory(&self, cert_name: &str) -> PathBuf {
        self.root.join(cert_name)
    }

    pub async fn contains(&self, cert_name: &str) -> std::io::Result<bool> {
        tokio::fs::try_exists(self.directory(cert_name)).await
    }

    pub async fn load(&self, cert_name: &str) -> anyhow::Result<CertificateRecord> {
        CertificateRecord::load(&self.directory(cert_name)).await
    }
}

/// One async mutex per certificate name, so only one issuance per name runs at a time.
///
/// The table only holds weak references; a name's entry dies with its last guard.
#[derive(Debug, Default)]
pub struct IssuanceLocks {
    locks: SyncMutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl IssuanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other issuance for `cert_name` is in flight and claims it.
    pub async fn lock(&self, cert_name: &str) -> IssuanceGuard {
        let mutex = self.mutex_for(cert_name);
        let guard = mutex.lock_owned().await;
        IssuanceGuard { _guard: guard }
    }

    fn mutex_for(&self, cert_name: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        if let Some(existing) = locks.get(cert_name).and_then(Weak::upgrade) {
            return existing;
        }
        // Drop entries whose guards are all gone before adding a new one
        locks.retain(|_, lock| lock.strong_count() > 0);
        let mutex = Arc::new(AsyncMutex::new(()));
        locks.insert(cert_name.to_string(), Arc::downgrade(&mutex));
        trace!("Created issuance lock for {cert_name}, {} active", locks.len());
        mutex
    }

    #[cfg(test)]
    fn active(&self) -> usize {
        self.locks
            .lock()
            .values()
            .filter(|lock| lock.strong_count() > 0)
            .count()
    }
}

#[must_use]
pub struct IssuanceGuard {
    _guard: OwnedMutexGuard<()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_contains_checks_directory() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = CertificateStore::new(dir.path());
        std::fs::create_dir(dir.path().join("a.mobiledgex.net,b.mobiledgex.net"))?;

        assert!(store.contains("a.mobiledgex.net,b.mobiledgex.net").await?);
        assert!(!store.contains("a.mobiledgex.net").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_same_name_is_serialized() {
        let locks = Arc::new(IssuanceLocks::new());
        let first = locks.lock("foo.mobiledgex.net").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("foo.mobiledgex.net").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(5), contender)
            .await
            .expect("contender should acquire the lock")
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_names_do_not_block() {
        let locks = IssuanceLocks::new();
        let _first = locks.lock("a.mobiledgex.net").await;

        let second = tokio::time::timeout(Duration::from_secs(1), locks.lock("b.mobiledgex.net")).await;

        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_released_locks_are_pruned() {
        let locks = IssuanceLocks::new();
        drop(locks.lock("a.mobiledgex.net").await);
        drop(locks.lock("b.mobiledgex.net").await);

        let _held = locks.lock("c.mobiledgex.net").await;

        assert_eq!(locks.active(), 1);
        assert_eq!(locks.locks.lock().len(), 1);
    }
}

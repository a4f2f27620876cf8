use once_cell::sync::OnceCell;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errors::{GatewayError, Result};
use crate::store::{DocumentStore, MemoryStore};

type Connector = dyn Fn() -> Result<Arc<dyn DocumentStore>> + Send + Sync;

/// Process-wide store handle, created on first use.
///
/// Concurrent first callers block on the same initialisation. A failed initialisation leaves
/// the cell empty, so the next call tries again.
pub struct Connection {
    connector: Box<Connector>,
    cell: OnceCell<Arc<dyn DocumentStore>>,
    attempts: AtomicUsize,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("initialized", &self.is_initialized())
            .field("attempts", &self.init_attempts())
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(connector: impl Fn() -> Result<Arc<dyn DocumentStore>> + Send + Sync + 'static) -> Self {
        Self { connector: Box::new(connector), cell: OnceCell::new(), attempts: AtomicUsize::new(0) }
    }

    /// An already-initialised connection.
    #[must_use]
    pub fn from_store(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            connector: Box::new(|| -> Result<Arc<dyn DocumentStore>> {
                Err(GatewayError::StoreUnavailable("no connector".into()))
            }),
            cell: OnceCell::with_value(store),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Lazily open a [`MemoryStore`] seeded from `dir`.
    #[must_use]
    pub fn memory_from_dir(dir: PathBuf) -> Self {
        Self::new(move || {
            let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::open_dir(&dir)?);
            Ok(store)
        })
    }

    /// The shared store, initialising it if needed.
    ///
    /// # Errors
    /// Returns `StoreUnavailable` when initialisation fails.
    pub fn get(&self) -> Result<Arc<dyn DocumentStore>> {
        self.cell
            .get_or_try_init(|| {
                let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                log::info!("initialising store connection (attempt {n})");
                (self.connector)().map_err(|e| {
                    log::error!("store initialisation failed: {e}");
                    match e {
                        GatewayError::StoreUnavailable(_) => e,
                        other => GatewayError::StoreUnavailable(other.to_string()),
                    }
                })
            })
            .cloned()
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Number of times the connector has been invoked.
    #[must_use]
    pub fn init_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_init_is_unavailable_and_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let conn = Connection::new(move || {
            if c.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(GatewayError::Io("refused".into()))
            } else {
                let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
                Ok(store)
            }
        });
        assert!(matches!(conn.get(), Err(GatewayError::StoreUnavailable(m)) if m.contains("refused")));
        assert!(!conn.is_initialized());
        conn.get().unwrap();
        conn.get().unwrap();
        assert_eq!(conn.init_attempts(), 2);
    }

    #[test]
    fn missing_seed_dir_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::memory_from_dir(dir.path().join("absent"));
        assert!(matches!(conn.get(), Err(GatewayError::StoreUnavailable(_))));
    }
}

//! Typed, soft-failing view over a [`CacheStorage`] backend.

use std::path::Path;
use std::sync::Arc;

use color_eyre::Result;
use tracing::{debug, warn};

use crate::api::types::{AccountToken, Snapshot, Timestamped};
use crate::codec::Codec;

use super::storage::{CacheStorage, NoopStorage, SqliteStorage};
use super::traits::{Cacheable, EntityKind, StoredRecord};

/// Persistent cache used by the resource store.
///
/// Storage errors never reach the caller: reads degrade to `None` and writes
/// to no-ops, with the cause logged. Durability is an optimization only.
///
/// Every storage call runs on the blocking pool, so a database locked by
/// another instance delays only the task waiting on it.
#[derive(Clone)]
pub struct PersistentCache {
  storage: Arc<dyn CacheStorage>,
}

impl PersistentCache {
  pub fn new(storage: impl CacheStorage + 'static) -> Self {
    Self {
      storage: Arc::new(storage),
    }
  }

  /// A cache that is always empty.
  pub fn disabled() -> Self {
    Self::new(NoopStorage)
  }

  /// Open the SQLite cache at `path`, falling back to [`Self::disabled`]
  /// when the host cannot provide it. Runs once at startup, before any
  /// fetch is dispatched.
  pub fn open_or_disabled(path: &Path) -> Self {
    match SqliteStorage::open(path) {
      Ok(storage) => {
        debug!(path = %path.display(), "opened persistent cache");
        Self::new(storage)
      }
      Err(e) => {
        warn!(error = %e, "running without persistent cache");
        Self::disabled()
      }
    }
  }

  /// Run `op` against the backend on the blocking pool. `None` when it failed.
  async fn blocking<T, F>(&self, action: &'static str, op: F) -> Option<T>
  where
    T: Send + 'static,
    F: FnOnce(&dyn CacheStorage) -> Result<T> + Send + 'static,
  {
    let storage = Arc::clone(&self.storage);
    match tokio::task::spawn_blocking(move || op(storage.as_ref())).await {
      Ok(Ok(value)) => Some(value),
      Ok(Err(e)) => {
        warn!(action, error = %e, "cache operation failed");
        None
      }
      Err(e) => {
        warn!(action, error = %e, "cache task did not complete");
        None
      }
    }
  }

  pub async fn read<C: Cacheable>(&self, id: &C::Id) -> Option<Snapshot<C::Data>> {
    let key = id.to_string();
    let record = {
      let key = key.clone();
      self
        .blocking("read", move |storage| storage.read(C::KIND, &key))
        .await??
    };

    match Option::<C::Data>::from_bytes(&record.value) {
      Ok(value) => Some(Timestamped::new(value, record.observed_at)),
      Err(e) => {
        warn!(kind = %C::KIND, id = %key, error = %e, "discarding undecodable cache record");
        None
      }
    }
  }

  /// Freshness-checked write. Returns whether `snapshot` was committed.
  pub async fn write<C: Cacheable>(&self, id: &C::Id, snapshot: &Snapshot<C::Data>) -> bool {
    let key = id.to_string();
    let observed_at = snapshot.observed_at;
    let record = StoredRecord {
      observed_at,
      value: snapshot.value.to_bytes(),
    };

    let committed = {
      let key = key.clone();
      self
        .blocking("write", move |storage| {
          storage.write_if_newer(C::KIND, &key, &record)
        })
        .await
        .unwrap_or(false)
    };
    if !committed {
      debug!(kind = %C::KIND, id = %key, at = %observed_at, "cache record not replaced");
    }
    committed
  }

  /// Empty the storage unit of one kind.
  pub async fn clear(&self, kind: EntityKind) {
    self
      .blocking("clear", move |storage| storage.clear(kind))
      .await;
  }

  pub async fn read_token(&self) -> Option<AccountToken> {
    self
      .blocking("read_token", |storage| storage.read_token())
      .await
      .flatten()
      .map(AccountToken::new)
  }

  pub async fn write_token(&self, token: &AccountToken) {
    let token = token.as_str().to_string();
    self
      .blocking("write_token", move |storage| storage.write_token(&token))
      .await;
  }

  pub async fn clear_token(&self) {
    self
      .blocking("clear_token", |storage| storage.clear_token())
      .await;
  }

  /// Clear the stored token unless it was replaced since `token` was read.
  pub async fn clear_token_if(&self, token: &AccountToken) {
    let token = token.as_str().to_string();
    self
      .blocking("clear_token", move |storage| storage.clear_token_if(&token))
      .await;
  }
}

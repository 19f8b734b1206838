//! Core traits and types for the persistent cache.

use std::fmt;
use std::hash::Hash;

use serde::Serialize;

use crate::api::types::Timestamp;
use crate::codec::Codec;

/// The remotely-sourced data categories. Each has its own storage unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntityKind {
  Account,
  Project,
  TypePart,
  Image,
}

impl EntityKind {
  /// Name of the storage unit (table) holding this kind.
  pub fn table(&self) -> &'static str {
    match self {
      EntityKind::Account => "account",
      EntityKind::Project => "project",
      EntityKind::TypePart => "typePart",
      EntityKind::Image => "image-binary",
    }
  }
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.table())
  }
}

/// An entity kind that can be persisted.
///
/// Records are keyed by the id's string form and hold the wire encoding of
/// `Option<Data>` next to the time the server produced it.
pub trait Cacheable: Send + Sync + 'static {
  type Id: Clone + Eq + Hash + Codec + fmt::Display + fmt::Debug + Send + Sync + 'static;
  type Data: Codec + Clone + fmt::Debug + Send + Sync + 'static;

  const KIND: EntityKind;
}

/// A persisted record as the storage backend sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
  pub observed_at: Timestamp,
  pub value: Vec<u8>,
}

//! Fetch lifecycle of a single remote entity.

use std::collections::HashMap;
use std::hash::Hash;

use chrono::Duration;

use crate::api::types::{Snapshot, Timestamp, Timestamped};

/// The state of one (kind, id) entry.
///
/// `WaitFetch`, `Fetching` and `Unavailable` keep the last known snapshot,
/// if any, so callers can keep showing it while a refresh is pending or after
/// it failed. `Stale` is not a state: it is a `Fresh` entry older than the
/// caller's freshness horizon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceState<T> {
  /// Never requested.
  Absent,
  /// Requested, waiting for the next dispatch.
  WaitFetch(Option<Snapshot<T>>),
  /// A network call is in flight.
  Fetching(Option<Snapshot<T>>),
  Fresh(Timestamped<T>),
  /// The server confirmed the entity does not exist.
  Deleted(Timestamp),
  /// The last fetch failed; `request` re-arms it.
  Unavailable(Option<Snapshot<T>>),
}

impl<T> Default for ResourceState<T> {
  fn default() -> Self {
    Self::Absent
  }
}

/// The newer of the two; ties keep `current`.
fn newest<T>(current: Option<Snapshot<T>>, candidate: Snapshot<T>) -> Snapshot<T> {
  match current {
    Some(current) if current.observed_at >= candidate.observed_at => current,
    _ => candidate,
  }
}

impl<T> ResourceState<T> {
  fn resolved(snapshot: Snapshot<T>) -> Self {
    match snapshot.value {
      Some(value) => Self::Fresh(Timestamped::new(value, snapshot.observed_at)),
      None => Self::Deleted(snapshot.observed_at),
    }
  }

  fn into_snapshot(self) -> Option<Snapshot<T>> {
    match self {
      Self::Absent => None,
      Self::WaitFetch(known) | Self::Fetching(known) | Self::Unavailable(known) => known,
      Self::Fresh(current) => Some(current.map(Some)),
      Self::Deleted(at) => Some(Timestamped::new(None, at)),
    }
  }

  /// Timestamp of the newest thing known about the entity.
  pub fn observed_at(&self) -> Option<Timestamp> {
    match self {
      Self::Absent => None,
      Self::WaitFetch(known) | Self::Fetching(known) | Self::Unavailable(known) => {
        known.as_ref().map(|k| k.observed_at)
      }
      Self::Fresh(current) => Some(current.observed_at),
      Self::Deleted(at) => Some(*at),
    }
  }

  /// The newest known value, including one kept during a refresh.
  pub fn value(&self) -> Option<&T> {
    match self {
      Self::Fresh(current) => Some(&current.value),
      Self::WaitFetch(known) | Self::Fetching(known) | Self::Unavailable(known) => {
        known.as_ref().and_then(|k| k.value.as_ref())
      }
      Self::Absent | Self::Deleted(_) => None,
    }
  }

  pub fn is_in_flight(&self) -> bool {
    matches!(self, Self::WaitFetch(_) | Self::Fetching(_))
  }

  /// A `Fresh` entry older than `horizon`. `None` means never stale.
  pub fn is_stale(&self, horizon: Option<Duration>, now: Timestamp) -> bool {
    match (self, horizon) {
      (Self::Fresh(current), Some(horizon)) => current.observed_at.is_older_than(horizon, now),
      _ => false,
    }
  }

  pub fn label(&self) -> &'static str {
    match self {
      Self::Absent => "absent",
      Self::WaitFetch(_) => "waitFetch",
      Self::Fetching(_) => "fetching",
      Self::Fresh(_) => "fresh",
      Self::Deleted(_) => "deleted",
      Self::Unavailable(_) => "unavailable",
    }
  }

  /// Arm a fetch. A no-op while one is already waiting or in flight, and for
  /// a `Fresh` entry that is not stale. Returns whether the state changed.
  pub fn request(&mut self, horizon: Option<Duration>, now: Timestamp) -> bool {
    match self {
      Self::WaitFetch(_) | Self::Fetching(_) => return false,
      Self::Fresh(_) if !self.is_stale(horizon, now) => return false,
      Self::Absent | Self::Fresh(_) | Self::Deleted(_) | Self::Unavailable(_) => {}
    }
    let known = std::mem::take(self).into_snapshot();
    *self = Self::WaitFetch(known);
    true
  }

  /// `WaitFetch` → `Fetching`. Returns whether a fetch should be issued.
  pub fn start_fetch(&mut self) -> bool {
    match std::mem::take(self) {
      Self::WaitFetch(known) => {
        *self = Self::Fetching(known);
        true
      }
      other => {
        *self = other;
        false
      }
    }
  }

  /// Freshness merge: adopt `candidate` only if it is strictly newer than
  /// what is known. In-flight states keep their phase and only remember the
  /// candidate. Returns whether anything changed.
  pub fn merge(&mut self, candidate: Snapshot<T>) -> bool {
    if let Some(at) = self.observed_at() {
      if candidate.observed_at <= at {
        return false;
      }
    }
    match self {
      Self::WaitFetch(known) | Self::Fetching(known) => *known = Some(candidate),
      _ => *self = Self::resolved(candidate),
    }
    true
  }

  /// Apply the outcome of the in-flight fetch. `None` means the fetch failed.
  ///
  /// The result never moves the entry backwards in time: when something newer
  /// was merged while the fetch was in flight, that wins.
  pub fn complete(&mut self, result: Option<Snapshot<T>>) -> bool {
    match std::mem::take(self) {
      Self::Fetching(known) => {
        *self = match result {
          Some(fetched) => Self::resolved(newest(known, fetched)),
          None => Self::Unavailable(known),
        };
        true
      }
      other => {
        *self = other;
        result.map_or(false, |fetched| self.merge(fetched))
      }
    }
  }
}

/// Id → state for one kind. Entries are created on first observation and
/// never removed.
#[derive(Debug)]
pub struct ResourceMap<K, T> {
  entries: HashMap<K, ResourceState<T>>,
}

impl<K, T> Default for ResourceMap<K, T> {
  fn default() -> Self {
    Self {
      entries: HashMap::new(),
    }
  }
}

impl<K: Eq + Hash + Clone, T> ResourceMap<K, T> {
  pub fn get(&self, id: &K) -> Option<&ResourceState<T>> {
    self.entries.get(id)
  }

  /// The entry for `id`, created as `Absent` if unseen.
  pub fn entry(&mut self, id: &K) -> &mut ResourceState<T> {
    self.entries.entry(id.clone()).or_default()
  }

  /// Move every waiting entry to `Fetching` and return their ids.
  pub fn start_waiting(&mut self) -> Vec<K> {
    self
      .entries
      .iter_mut()
      .filter_map(|(id, state)| state.start_fetch().then(|| id.clone()))
      .collect()
  }

  pub fn has_waiting(&self) -> bool {
    self
      .entries
      .values()
      .any(|state| matches!(state, ResourceState::WaitFetch(_)))
  }
}

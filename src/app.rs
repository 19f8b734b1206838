//! Command-line driver: request the targets, wait until the store settles,
//! report what is known.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::api::types::{
  AccountId, AccountToken, Binary, ImageHash, OpenIdConnectProvider, ProjectId, TypePartId,
};
use crate::api::{ApiClient, HttpTransport};
use crate::cache::PersistentCache;
use crate::config::Config;
use crate::resource::{
  Accounts, BulkQuery, Images, LogInState, Projects, ResourceState, ResourceStore, TypeParts,
};

/// Something to fetch, as written on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
  Project(ProjectId),
  Account(AccountId),
  TypePart(TypePartId),
  Image(ImageHash),
  TopProjects,
  TypePartsOf(ProjectId),
}

impl FromStr for Target {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    if s == "top-projects" {
      return Ok(Target::TopProjects);
    }
    let (kind, id) = s
      .split_once(':')
      .ok_or_else(|| eyre!("Invalid target {s:?}, expected <kind>:<id> or top-projects"))?;
    if id.is_empty() {
      return Err(eyre!("Invalid target {s:?}: empty id"));
    }
    match kind {
      "project" => Ok(Target::Project(ProjectId::new(id))),
      "account" => Ok(Target::Account(AccountId::new(id))),
      "type-part" => Ok(Target::TypePart(TypePartId::new(id))),
      "image" => Ok(Target::Image(ImageHash::new(id))),
      "type-parts-of" => Ok(Target::TypePartsOf(ProjectId::new(id))),
      other => Err(eyre!("Unknown target kind {other:?}")),
    }
  }
}

impl fmt::Display for Target {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Target::Project(id) => write!(f, "project:{id}"),
      Target::Account(id) => write!(f, "account:{id}"),
      Target::TypePart(id) => write!(f, "type-part:{id}"),
      Target::Image(hash) => write!(f, "image:{hash}"),
      Target::TopProjects => f.write_str("top-projects"),
      Target::TypePartsOf(id) => write!(f, "type-parts-of:{id}"),
    }
  }
}

/// Main application state
pub struct App {
  store: ResourceStore,
  targets: Vec<Target>,
}

impl App {
  pub fn new(config: &Config, targets: Vec<Target>) -> Result<Self> {
    let transport = HttpTransport::new(config.api.base_url()?, config.api.timeout())?;
    let cache = match config.cache.resolved_path() {
      Some(path) if config.cache.enabled => PersistentCache::open_or_disabled(&path),
      Some(_) => PersistentCache::disabled(),
      None => {
        warn!("no data directory; persistent cache disabled");
        PersistentCache::disabled()
      }
    };
    let store = ResourceStore::new(ApiClient::new(Arc::new(transport)), cache)
      .with_stale_time(config.cache.stale_time());
    Ok(Self::with_store(store, targets))
  }

  pub fn with_store(store: ResourceStore, targets: Vec<Target>) -> Self {
    Self { store, targets }
  }

  /// Start the session: a token from the environment replaces the stored one.
  pub async fn start_session(&mut self, token: Option<AccountToken>) {
    match token {
      Some(token) => self.store.log_in(token).await,
      None => {
        self.store.restore_session().await;
      }
    }
  }

  pub async fn run(&mut self) -> Result<Value> {
    for target in &self.targets {
      debug!(%target, "requesting");
      match target {
        Target::Project(id) => self.store.request::<Projects>(id),
        Target::Account(id) => self.store.request::<Accounts>(id),
        Target::TypePart(id) => self.store.request::<TypeParts>(id),
        Target::Image(hash) => self.store.request::<Images>(hash),
        Target::TopProjects => self.store.request_bulk(BulkQuery::TopProjects),
        Target::TypePartsOf(id) => self.store.request_bulk(BulkQuery::TypePartsOf(id.clone())),
      };
    }

    // Main loop
    loop {
      self.store.dispatch();
      let settled = tokio::select! {
        changed = self.store.wait_for_change() => !changed,
        _ = tokio::signal::ctrl_c() => {
          info!("interrupted");
          true
        }
      };
      if settled {
        break;
      }
    }
    if self.store.in_flight() > 0 {
      warn!(in_flight = self.store.in_flight(), "reporting before all fetches completed");
    }

    Ok(self.summary())
  }

  /// Ask the server for a login URL that returns to `location`.
  pub async fn log_in_url(&self, provider: OpenIdConnectProvider, location: &str) -> Result<String> {
    self
      .store
      .request_log_in_url(provider, location)
      .await
      .ok_or_else(|| eyre!("Could not get a login URL for {provider:?}"))
  }

  fn summary(&mut self) -> Value {
    let targets = self.targets.clone();
    let results: Vec<Value> = targets
      .iter()
      .map(|target| {
        let mut entry = match target {
          Target::Project(id) => describe(self.store.get::<Projects>(id)),
          Target::Account(id) => describe(self.store.get::<Accounts>(id)),
          Target::TypePart(id) => describe(self.store.get::<TypeParts>(id)),
          Target::Image(hash) => describe_image(self.store.get::<Images>(hash)),
          Target::TopProjects => describe(self.store.top_projects()),
          Target::TypePartsOf(id) => describe(self.store.type_parts_of(id)),
        };
        entry["target"] = json!(target.to_string());
        entry
      })
      .collect();

    let session = match self.store.log_in_state() {
      LogInState::LoggedIn { account_id, .. } => json!({
        "state": "loggedIn",
        "accountId": account_id,
        "account": self.store.peek::<Accounts>(account_id).and_then(|s| s.value()),
      }),
      other => json!({ "state": other.label() }),
    };

    json!({ "session": session, "results": results })
  }
}

fn describe<T: Serialize>(state: &ResourceState<T>) -> Value {
  json!({
    "state": state.label(),
    "observedAt": state.observed_at(),
    "value": state.value(),
  })
}

fn describe_image(state: &ResourceState<Binary>) -> Value {
  json!({
    "state": state.label(),
    "observedAt": state.observed_at(),
    "bytes": state.value().map(|binary| binary.0.len()),
  })
}

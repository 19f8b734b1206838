//! The per-kind resource maps plus the machinery that fills them.
//!
//! The store is owned by a single task. Network calls run on spawned tasks
//! and report back over a channel; [`ResourceStore::poll`] and
//! [`ResourceStore::wait_for_change`] apply their results. Every change to
//! the in-memory state bumps the version published by
//! [`ResourceStore::subscribe`].

use chrono::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::api::operations::{
  GetAccountByAccountToken, GetTop50Project, GetTypePartByProjectId, RequestLogInUrl,
};
use crate::api::types::{
  Account, AccountId, AccountToken, Binary, IdAndData, ImageHash, LogInUrlRequest,
  OpenIdConnectProvider, Project, ProjectId, Snapshot, Timestamp, Timestamped, TypePart,
  TypePartId,
};
use crate::api::ApiClient;
use crate::cache::PersistentCache;

use super::kind::{Accounts, Images, Projects, Resource, ResourceMaps, TypeParts};
use super::state::{ResourceMap, ResourceState};

const DEFAULT_STALE_TIME_SECS: i64 = 300;

/// What a single-entity fetch task found: the cached record read before the
/// call and the call's own result.
#[derive(Debug)]
pub struct Fetched<T> {
  pub cached: Option<Snapshot<T>>,
  pub result: Option<Snapshot<T>>,
}

/// A finished background task, applied by the owning task.
#[derive(Debug)]
pub enum Completion {
  Project(ProjectId, Fetched<Project>),
  Account(AccountId, Fetched<Account>),
  TypePart(TypePartId, Fetched<TypePart>),
  Image(ImageHash, Fetched<Binary>),
  TopProjects(Option<Timestamped<Vec<IdAndData<ProjectId, Project>>>>),
  TypePartsOfProject(
    ProjectId,
    Option<Timestamped<Option<Vec<IdAndData<TypePartId, TypePart>>>>>,
  ),
  Session {
    token: AccountToken,
    result: Option<Option<IdAndData<AccountId, Account>>>,
    verified_at: Timestamp,
  },
}

/// Queries returning many entities at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkQuery {
  TopProjects,
  TypePartsOf(ProjectId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogInState {
  Guest,
  VerifyingToken(AccountToken),
  LoggedIn {
    token: AccountToken,
    account_id: AccountId,
  },
}

impl LogInState {
  pub fn label(&self) -> &'static str {
    match self {
      LogInState::Guest => "guest",
      LogInState::VerifyingToken(_) => "verifyingToken",
      LogInState::LoggedIn { .. } => "loggedIn",
    }
  }
}

pub struct ResourceStore {
  api: ApiClient,
  cache: PersistentCache,
  stale_time: Duration,
  maps: ResourceMaps,
  top_projects: ResourceState<Vec<ProjectId>>,
  project_type_parts: ResourceMap<ProjectId, Vec<TypePartId>>,
  log_in: LogInState,
  in_flight: usize,
  completions_tx: mpsc::UnboundedSender<Completion>,
  completions_rx: mpsc::UnboundedReceiver<Completion>,
  changes: watch::Sender<u64>,
}

impl ResourceStore {
  pub fn new(api: ApiClient, cache: PersistentCache) -> Self {
    let (completions_tx, completions_rx) = mpsc::unbounded_channel();
    let (changes, _) = watch::channel(0);
    Self {
      api,
      cache,
      stale_time: Duration::seconds(DEFAULT_STALE_TIME_SECS),
      maps: ResourceMaps::default(),
      top_projects: ResourceState::Absent,
      project_type_parts: ResourceMap::default(),
      log_in: LogInState::Guest,
      in_flight: 0,
      completions_tx,
      completions_rx,
      changes,
    }
  }

  /// How old a `Fresh` entry may get before `request` fetches it again.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  /// Receives the store's version after every change.
  pub fn subscribe(&self) -> watch::Receiver<u64> {
    self.changes.subscribe()
  }

  fn notify(&self) {
    self.changes.send_modify(|version| *version += 1);
  }

  fn horizon<R: Resource>(&self) -> Option<Duration> {
    (!R::IMMUTABLE).then_some(self.stale_time)
  }

  /// The entry for `id`. Never triggers a fetch.
  pub fn get<R: Resource>(&mut self, id: &R::Id) -> &ResourceState<R::Data> {
    R::map_mut(&mut self.maps).entry(id)
  }

  /// Like [`get`](Self::get) without creating an entry.
  pub fn peek<R: Resource>(&self, id: &R::Id) -> Option<&ResourceState<R::Data>> {
    R::map(&self.maps).get(id)
  }

  /// Ask for `id` to be fetched on the next [`dispatch`](Self::dispatch)
  /// unless a fetch is already pending or the entry is fresh.
  pub fn request<R: Resource>(&mut self, id: &R::Id) -> bool {
    let horizon = self.horizon::<R>();
    self.request_within::<R>(id, horizon)
  }

  /// [`request`](Self::request) with an explicit freshness horizon.
  pub fn request_within<R: Resource>(&mut self, id: &R::Id, horizon: Option<Duration>) -> bool {
    let armed = R::map_mut(&mut self.maps)
      .entry(id)
      .request(horizon, Timestamp::now());
    if armed {
      debug!(kind = %R::KIND, %id, "fetch requested");
      self.notify();
    }
    armed
  }

  pub fn request_bulk(&mut self, query: BulkQuery) -> bool {
    let horizon = Some(self.stale_time);
    let now = Timestamp::now();
    let armed = match &query {
      BulkQuery::TopProjects => self.top_projects.request(horizon, now),
      BulkQuery::TypePartsOf(project) => self
        .project_type_parts
        .entry(project)
        .request(horizon, now),
    };
    if armed {
      debug!(?query, "bulk fetch requested");
      self.notify();
    }
    armed
  }

  /// Ids of the top projects, in server order.
  pub fn top_projects(&self) -> &ResourceState<Vec<ProjectId>> {
    &self.top_projects
  }

  /// Ids of the type parts belonging to `project`. `Deleted` when the project
  /// does not exist.
  pub fn type_parts_of(&mut self, project: &ProjectId) -> &ResourceState<Vec<TypePartId>> {
    self.project_type_parts.entry(project)
  }

  pub fn log_in_state(&self) -> &LogInState {
    &self.log_in
  }

  /// Fetches still waiting to be applied.
  pub fn in_flight(&self) -> usize {
    self.in_flight
  }

  /// Nothing waiting to be dispatched and nothing in flight.
  pub fn is_idle(&self) -> bool {
    self.in_flight == 0
      && !self.top_projects.is_in_flight()
      && !self.project_type_parts.has_waiting()
      && !self.maps.projects.has_waiting()
      && !self.maps.accounts.has_waiting()
      && !self.maps.type_parts.has_waiting()
      && !self.maps.images.has_waiting()
  }

  /// Attached to every call, including while it is being verified.
  fn token(&self) -> Option<AccountToken> {
    match &self.log_in {
      LogInState::LoggedIn { token, .. } | LogInState::VerifyingToken(token) => {
        Some(token.clone())
      }
      LogInState::Guest => None,
    }
  }

  /// Issue one network call per waiting entry. Returns how many started.
  pub fn dispatch(&mut self) -> usize {
    let mut started = self.dispatch_kind::<Projects>()
      + self.dispatch_kind::<Accounts>()
      + self.dispatch_kind::<TypeParts>()
      + self.dispatch_kind::<Images>();

    if self.top_projects.start_fetch() {
      self.spawn_top_projects();
      started += 1;
    }
    for project in self.project_type_parts.start_waiting() {
      self.spawn_type_parts_of(project);
      started += 1;
    }

    if started > 0 {
      debug!(started, in_flight = self.in_flight, "dispatched fetches");
      self.notify();
    }
    started
  }

  fn dispatch_kind<R: Resource>(&mut self) -> usize {
    let ids = R::map_mut(&mut self.maps).start_waiting();
    for id in &ids {
      self.spawn_fetch::<R>(id.clone());
    }
    ids.len()
  }

  fn spawn_fetch<R: Resource>(&mut self, id: R::Id) {
    let api = self.api.clone();
    let cache = self.cache.clone();
    let token = self.token();
    let tx = self.completions_tx.clone();
    self.in_flight += 1;

    tokio::spawn(async move {
      let cached = cache.read::<R>(&id).await;
      let result = R::fetch(api, id.clone(), token).await;
      if let Some(snapshot) = &result {
        cache.write::<R>(&id, snapshot).await;
      }
      let _ = tx.send(R::completion(id, Fetched { cached, result }));
    });
  }

  fn spawn_top_projects(&mut self) {
    let api = self.api.clone();
    let cache = self.cache.clone();
    let token = self.token();
    let tx = self.completions_tx.clone();
    self.in_flight += 1;

    tokio::spawn(async move {
      let result = api.call::<GetTop50Project>(&(), token.as_ref()).await;
      if let Some(list) = &result {
        for item in &list.value {
          let snapshot = Timestamped::new(Some(item.data.clone()), list.observed_at);
          cache.write::<Projects>(&item.id, &snapshot).await;
        }
      }
      let _ = tx.send(Completion::TopProjects(result));
    });
  }

  fn spawn_type_parts_of(&mut self, project: ProjectId) {
    let api = self.api.clone();
    let cache = self.cache.clone();
    let token = self.token();
    let tx = self.completions_tx.clone();
    self.in_flight += 1;

    tokio::spawn(async move {
      let result = api
        .call::<GetTypePartByProjectId>(&project, token.as_ref())
        .await;
      if let Some(Timestamped {
        value: Some(list),
        observed_at,
      }) = &result
      {
        for item in list {
          let snapshot = Timestamped::new(Some(item.data.clone()), *observed_at);
          cache.write::<TypeParts>(&item.id, &snapshot).await;
        }
      }
      let _ = tx.send(Completion::TypePartsOfProject(project, result));
    });
  }

  /// Apply every completion that has already arrived. Returns whether any
  /// did.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;
    while let Ok(completion) = self.completions_rx.try_recv() {
      self.apply(completion);
      changed = true;
    }
    if changed {
      self.notify();
    }
    changed
  }

  /// Wait for at least one completion and apply it along with any others
  /// already queued. Returns `false` immediately when nothing is in flight.
  pub async fn wait_for_change(&mut self) -> bool {
    if self.in_flight == 0 {
      return false;
    }
    match self.completions_rx.recv().await {
      Some(completion) => self.apply(completion),
      None => return false,
    }
    while let Ok(completion) = self.completions_rx.try_recv() {
      self.apply(completion);
    }
    self.notify();
    true
  }

  /// Dispatch and apply until nothing is waiting or in flight.
  pub async fn settle(&mut self) {
    loop {
      self.dispatch();
      if !self.wait_for_change().await {
        break;
      }
    }
  }

  fn apply(&mut self, completion: Completion) {
    self.in_flight = self.in_flight.saturating_sub(1);
    match completion {
      Completion::Project(id, fetched) => self.apply_fetched::<Projects>(id, fetched),
      Completion::Account(id, fetched) => self.apply_fetched::<Accounts>(id, fetched),
      Completion::TypePart(id, fetched) => self.apply_fetched::<TypeParts>(id, fetched),
      Completion::Image(hash, fetched) => self.apply_fetched::<Images>(hash, fetched),
      Completion::TopProjects(result) => self.apply_top_projects(result),
      Completion::TypePartsOfProject(project, result) => {
        self.apply_type_parts_of(project, result)
      }
      Completion::Session {
        token,
        result,
        verified_at,
      } => self.apply_session(token, result, verified_at),
    }
  }

  fn apply_fetched<R: Resource>(&mut self, id: R::Id, fetched: Fetched<R::Data>) {
    let state = R::map_mut(&mut self.maps).entry(&id);
    if let Some(cached) = fetched.cached {
      state.merge(cached);
    }
    state.complete(fetched.result);
    debug!(kind = %R::KIND, %id, state = state.label(), "fetch completed");
  }

  fn apply_top_projects(&mut self, result: Option<Timestamped<Vec<IdAndData<ProjectId, Project>>>>) {
    let Some(list) = result else {
      self.top_projects.complete(None);
      return;
    };
    let observed_at = list.observed_at;
    let mut ids = Vec::with_capacity(list.value.len());
    for item in list.value {
      self
        .maps
        .projects
        .entry(&item.id)
        .merge(Timestamped::new(Some(item.data), observed_at));
      ids.push(item.id);
    }
    debug!(count = ids.len(), "top projects fetched");
    self
      .top_projects
      .complete(Some(Timestamped::new(Some(ids), observed_at)));
  }

  fn apply_type_parts_of(
    &mut self,
    project: ProjectId,
    result: Option<Timestamped<Option<Vec<IdAndData<TypePartId, TypePart>>>>>,
  ) {
    let snapshot = match result {
      Some(Timestamped {
        value: Some(list),
        observed_at,
      }) => {
        let mut ids = Vec::with_capacity(list.len());
        for item in list {
          self
            .maps
            .type_parts
            .entry(&item.id)
            .merge(Timestamped::new(Some(item.data), observed_at));
          ids.push(item.id);
        }
        Some(Timestamped::new(Some(ids), observed_at))
      }
      Some(Timestamped {
        value: None,
        observed_at,
      }) => Some(Timestamped::new(None, observed_at)),
      None => None,
    };
    let state = self.project_type_parts.entry(&project);
    state.complete(snapshot);
    debug!(%project, state = state.label(), "type parts of project fetched");
  }

  /// Verify the token persisted by a previous session, if any.
  pub async fn restore_session(&mut self) -> bool {
    match self.cache.read_token().await {
      Some(token) => {
        info!("restoring previous session");
        self.verify(token);
        true
      }
      None => false,
    }
  }

  /// Persist `token` and verify it against the server.
  pub async fn log_in(&mut self, token: AccountToken) {
    self.cache.write_token(&token).await;
    self.verify(token);
  }

  pub async fn log_out(&mut self) {
    self.cache.clear_token().await;
    self.log_in = LogInState::Guest;
    info!("logged out");
    self.notify();
  }

  fn verify(&mut self, token: AccountToken) {
    let api = self.api.clone();
    let cache = self.cache.clone();
    let tx = self.completions_tx.clone();
    self.log_in = LogInState::VerifyingToken(token.clone());
    self.in_flight += 1;
    self.notify();

    tokio::spawn(async move {
      let result = api
        .call::<GetAccountByAccountToken>(&token, Some(&token))
        .await;
      let verified_at = Timestamp::now();
      match &result {
        Some(Some(account)) => {
          let snapshot = Timestamped::new(Some(account.data.clone()), verified_at);
          cache.write::<Accounts>(&account.id, &snapshot).await;
        }
        // A newer log in may have stored another token meanwhile.
        Some(None) => cache.clear_token_if(&token).await,
        None => {}
      }
      let _ = tx.send(Completion::Session {
        token,
        result,
        verified_at,
      });
    });
  }

  fn apply_session(
    &mut self,
    token: AccountToken,
    result: Option<Option<IdAndData<AccountId, Account>>>,
    verified_at: Timestamp,
  ) {
    if self.log_in != LogInState::VerifyingToken(token.clone()) {
      debug!("discarding verification of a superseded token");
      return;
    }
    self.log_in = match result {
      Some(Some(account)) => {
        self
          .maps
          .accounts
          .entry(&account.id)
          .merge(Timestamped::new(Some(account.data), verified_at));
        info!(account_id = %account.id, "logged in");
        LogInState::LoggedIn {
          token,
          account_id: account.id,
        }
      }
      Some(None) => {
        warn!("account token was rejected");
        LogInState::Guest
      }
      None => {
        warn!("could not verify account token; continuing as guest");
        LogInState::Guest
      }
    };
  }

  /// Ask the server where to send the user to log in with `provider`.
  pub async fn request_log_in_url(
    &self,
    provider: OpenIdConnectProvider,
    location: impl Into<String>,
  ) -> Option<String> {
    let request = LogInUrlRequest {
      provider,
      location: location.into(),
    };
    self.api.call::<RequestLogInUrl>(&request, None).await
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::api::operations::{GetAccount, GetImageFile, GetProject, Operation};
  use crate::cache::SqliteStorage;
  use crate::testing::{account, project, type_part, ScriptedTransport};

  fn at(millis: i64) -> Timestamp {
    Timestamp::from_millis(millis)
  }

  fn store(transport: &Arc<ScriptedTransport>) -> ResourceStore {
    let storage = SqliteStorage::open_in_memory().unwrap();
    ResourceStore::new(ApiClient::new(transport.clone()), PersistentCache::new(storage))
  }

  fn fresh<T>(value: T, millis: i64) -> ResourceState<T> {
    ResourceState::Fresh(Timestamped::new(value, at(millis)))
  }

  #[tokio::test]
  async fn test_fetch_resolves_and_persists() {
    let transport = Arc::new(ScriptedTransport::new());
    let id = ProjectId::new("p1");
    let snapshot = Timestamped::new(Some(project("Foo")), at(100));
    transport.reply::<GetProject>(&id, &snapshot);

    let mut store = store(&transport);
    assert_eq!(store.get::<Projects>(&id), &ResourceState::Absent);
    assert!(store.request::<Projects>(&id));
    store.settle().await;

    assert_eq!(store.get::<Projects>(&id), &fresh(project("Foo"), 100));
    assert_eq!(store.cache.read::<Projects>(&id).await, Some(snapshot));
    assert!(store.is_idle());
  }

  #[tokio::test]
  async fn test_poll_applies_completions_without_waiting() {
    let transport = Arc::new(ScriptedTransport::new());
    let id = ProjectId::new("p1");
    transport.reply::<GetProject>(&id, &Timestamped::new(Some(project("Foo")), at(100)));

    let mut store = store(&transport);
    store.request::<Projects>(&id);
    assert_eq!(store.dispatch(), 1);
    // The fetch task has not had a chance to run yet.
    assert!(!store.poll());
    assert!(!store.is_idle());

    while !store.is_idle() {
      tokio::time::sleep(std::time::Duration::from_millis(1)).await;
      store.poll();
    }

    assert_eq!(store.get::<Projects>(&id), &fresh(project("Foo"), 100));
    assert!(!store.poll());
  }

  #[tokio::test]
  async fn test_locked_cache_does_not_stall_the_event_loop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let storage = SqliteStorage::open(&path).unwrap();
    let locker = rusqlite::Connection::open(&path).unwrap();
    locker.execute_batch("BEGIN EXCLUSIVE").unwrap();

    let transport = Arc::new(ScriptedTransport::new());
    let id = ProjectId::new("p1");
    transport.reply::<GetProject>(&id, &Timestamped::new(Some(project("Foo")), at(100)));
    let mut store = ResourceStore::new(
      ApiClient::new(transport.clone()),
      PersistentCache::new(storage),
    );
    store.request::<Projects>(&id);
    store.dispatch();

    // The fetch task is now waiting on the lock; timers must still fire.
    let started = std::time::Instant::now();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(started.elapsed() < std::time::Duration::from_secs(1));

    locker.execute_batch("COMMIT").unwrap();
    store.settle().await;
    assert_eq!(store.get::<Projects>(&id), &fresh(project("Foo"), 100));
  }

  #[tokio::test]
  async fn test_deleted_entity_is_not_refetched_by_get() {
    let transport = Arc::new(ScriptedTransport::new());
    let id = ProjectId::new("gone");
    transport.reply::<GetProject>(&id, &Timestamped::new(None, at(50)));

    let mut store = store(&transport);
    store.request::<Projects>(&id);
    store.settle().await;

    assert_eq!(store.get::<Projects>(&id), &ResourceState::Deleted(at(50)));
    assert_eq!(store.get::<Projects>(&id).value(), None);
    assert_eq!(store.dispatch(), 0);
    assert_eq!(transport.calls(GetProject::NAME), 1);
  }

  #[tokio::test]
  async fn test_concurrent_requests_issue_one_call() {
    let transport = Arc::new(ScriptedTransport::new());
    let id = AccountId::new("a1");
    let gate = transport.gate::<GetAccount>(&id);

    let mut store = store(&transport);
    assert!(store.request::<Accounts>(&id));
    assert!(!store.request::<Accounts>(&id));
    assert_eq!(store.dispatch(), 1);
    assert!(!store.request::<Accounts>(&id));
    assert_eq!(store.dispatch(), 0);
    assert_eq!(store.get::<Accounts>(&id).label(), "fetching");

    gate.release(&Timestamped::new(Some(account("Ann")), at(7)));
    store.settle().await;

    assert_eq!(store.get::<Accounts>(&id), &fresh(account("Ann"), 7));
    assert_eq!(transport.calls(GetAccount::NAME), 1);
  }

  #[tokio::test]
  async fn test_failed_fetch_is_unavailable_and_rearms() {
    let transport = Arc::new(ScriptedTransport::new());
    let id = ProjectId::new("p1");
    transport.fail::<GetProject>(&id);
    transport.reply::<GetProject>(&id, &Timestamped::new(Some(project("Back")), at(9)));

    let mut store = store(&transport);
    store.request::<Projects>(&id);
    store.settle().await;
    assert_eq!(store.get::<Projects>(&id), &ResourceState::Unavailable(None));

    assert!(store.request::<Projects>(&id));
    store.settle().await;
    assert_eq!(store.get::<Projects>(&id), &fresh(project("Back"), 9));
  }

  #[tokio::test]
  async fn test_failed_fetch_serves_cached_record() {
    let transport = Arc::new(ScriptedTransport::new());
    let id = ProjectId::new("p1");
    transport.fail::<GetProject>(&id);

    let mut store = store(&transport);
    let cached = Timestamped::new(Some(project("Offline")), at(5));
    store.cache.write::<Projects>(&id, &cached).await;
    store.request::<Projects>(&id);
    store.settle().await;

    let state = store.get::<Projects>(&id);
    assert_eq!(state, &ResourceState::Unavailable(Some(cached)));
    assert_eq!(state.value().map(|p| p.name.as_str()), Some("Offline"));
  }

  #[tokio::test]
  async fn test_cached_record_newer_than_response_wins() {
    let transport = Arc::new(ScriptedTransport::new());
    let id = ProjectId::new("p1");
    transport.reply::<GetProject>(&id, &Timestamped::new(Some(project("Old")), at(3)));

    let mut store = store(&transport);
    store
      .cache
      .write::<Projects>(&id, &Timestamped::new(Some(project("New")), at(4)))
      .await;
    store.request::<Projects>(&id);
    store.settle().await;

    assert_eq!(store.get::<Projects>(&id), &fresh(project("New"), 4));
  }

  #[tokio::test]
  async fn test_stale_entry_is_refetched() {
    let transport = Arc::new(ScriptedTransport::new());
    let id = ProjectId::new("p1");
    transport.reply::<GetProject>(&id, &Timestamped::new(Some(project("Foo")), at(100)));
    transport.reply::<GetProject>(&id, &Timestamped::new(Some(project("Bar")), at(200)));

    let mut store = store(&transport);
    store.request::<Projects>(&id);
    store.settle().await;

    assert!(!store.request_within::<Projects>(&id, Some(Duration::days(365_000))));
    assert!(!store.request_within::<Projects>(&id, None));
    // Observed at t=100ms, so well past the default horizon.
    assert!(store.request::<Projects>(&id));
    assert_eq!(store.get::<Projects>(&id).value().map(|p| p.name.as_str()), Some("Foo"));
    store.settle().await;

    assert_eq!(store.get::<Projects>(&id), &fresh(project("Bar"), 200));
    assert_eq!(transport.calls(GetProject::NAME), 2);
  }

  #[tokio::test]
  async fn test_bulk_result_does_not_regress_newer_entry() {
    let transport = Arc::new(ScriptedTransport::new());
    let a = ProjectId::new("a");
    let b = ProjectId::new("b");
    transport.reply::<GetProject>(&a, &Timestamped::new(Some(project("A new")), at(20)));
    transport.reply::<GetTop50Project>(
      &(),
      &Timestamped::new(
        vec![
          IdAndData {
            id: a.clone(),
            data: project("A old"),
          },
          IdAndData {
            id: b.clone(),
            data: project("B"),
          },
        ],
        at(10),
      ),
    );

    let mut store = store(&transport);
    store.request::<Projects>(&a);
    store.settle().await;
    assert!(store.request_bulk(BulkQuery::TopProjects));
    store.settle().await;

    assert_eq!(store.top_projects(), &fresh(vec![a.clone(), b.clone()], 10));
    assert_eq!(store.get::<Projects>(&a), &fresh(project("A new"), 20));
    assert_eq!(store.get::<Projects>(&b), &fresh(project("B"), 10));
    assert_eq!(
      store.cache.read::<Projects>(&a).await.map(|s| s.observed_at),
      Some(at(20))
    );
    assert_eq!(
      store.cache.read::<Projects>(&b).await,
      Some(Timestamped::new(Some(project("B")), at(10)))
    );
  }

  #[tokio::test]
  async fn test_older_single_fetch_arriving_last_loses() {
    let transport = Arc::new(ScriptedTransport::new());
    let p = ProjectId::new("p");
    let single = transport.gate::<GetProject>(&p);
    let bulk = transport.gate::<GetTop50Project>(&());

    let mut store = store(&transport);
    store.request::<Projects>(&p);
    store.request_bulk(BulkQuery::TopProjects);
    assert_eq!(store.dispatch(), 2);

    bulk.release(&Timestamped::new(
      vec![IdAndData {
        id: p.clone(),
        data: project("Bulk"),
      }],
      at(2),
    ));
    assert!(store.wait_for_change().await);
    assert_eq!(
      store.get::<Projects>(&p),
      &ResourceState::Fetching(Some(Timestamped::new(Some(project("Bulk")), at(2))))
    );

    single.release(&Timestamped::new(Some(project("Single")), at(1)));
    assert!(store.wait_for_change().await);
    assert!(!store.wait_for_change().await);

    assert_eq!(store.get::<Projects>(&p), &fresh(project("Bulk"), 2));
    assert_eq!(
      store.cache.read::<Projects>(&p).await,
      Some(Timestamped::new(Some(project("Bulk")), at(2)))
    );
  }

  #[tokio::test]
  async fn test_type_parts_of_project() {
    let transport = Arc::new(ScriptedTransport::new());
    let project_id = ProjectId::new("p");
    let missing = ProjectId::new("missing");
    let part_id = TypePartId::new("t1");
    transport.reply::<GetTypePartByProjectId>(
      &project_id,
      &Timestamped::new(
        Some(vec![IdAndData {
          id: part_id.clone(),
          data: type_part("Int", &project_id),
        }]),
        at(30),
      ),
    );
    transport.reply::<GetTypePartByProjectId>(&missing, &Timestamped::new(None, at(31)));

    let mut store = store(&transport);
    store.request_bulk(BulkQuery::TypePartsOf(project_id.clone()));
    store.request_bulk(BulkQuery::TypePartsOf(missing.clone()));
    store.settle().await;

    assert_eq!(store.type_parts_of(&project_id), &fresh(vec![part_id.clone()], 30));
    assert_eq!(store.type_parts_of(&missing), &ResourceState::Deleted(at(31)));
    assert_eq!(
      store.get::<TypeParts>(&part_id),
      &fresh(type_part("Int", &project_id), 30)
    );
    assert!(store.cache.read::<TypeParts>(&part_id).await.is_some());
  }

  #[tokio::test]
  async fn test_image_content_is_checked_against_hash() {
    let transport = Arc::new(ScriptedTransport::new());
    let hash = ImageHash::of(b"png bytes");
    transport.reply::<GetImageFile>(&hash, &Binary(b"tampered".to_vec()));
    transport.reply::<GetImageFile>(&hash, &Binary(b"png bytes".to_vec()));

    let mut store = store(&transport);
    store.request::<Images>(&hash);
    store.settle().await;
    assert_eq!(store.get::<Images>(&hash).label(), "unavailable");

    store.request::<Images>(&hash);
    store.settle().await;
    assert_eq!(
      store.get::<Images>(&hash).value(),
      Some(&Binary(b"png bytes".to_vec()))
    );
    // Images never go stale.
    assert!(!store.request::<Images>(&hash));
    assert_eq!(transport.calls(GetImageFile::NAME), 2);
  }

  #[tokio::test]
  async fn test_log_in_verifies_and_attaches_token() {
    let transport = Arc::new(ScriptedTransport::new());
    let token = AccountToken::new("tok");
    let account_id = AccountId::new("a1");
    transport.reply::<GetAccountByAccountToken>(
      &token,
      &Some(IdAndData {
        id: account_id.clone(),
        data: account("Ann"),
      }),
    );
    let project_id = ProjectId::new("p");
    transport.reply::<GetProject>(&project_id, &Timestamped::new(None, at(1)));

    let mut store = store(&transport);
    assert!(!store.restore_session().await);
    store.log_in(token.clone()).await;
    assert_eq!(store.log_in_state(), &LogInState::VerifyingToken(token.clone()));
    store.settle().await;

    assert_eq!(
      store.log_in_state(),
      &LogInState::LoggedIn {
        token: token.clone(),
        account_id: account_id.clone(),
      }
    );
    assert_eq!(
      store.get::<Accounts>(&account_id).value(),
      Some(&account("Ann"))
    );
    assert_eq!(store.cache.read_token().await, Some(token));

    store.request::<Projects>(&project_id);
    store.settle().await;
    assert_eq!(
      transport.last_token_for(GetProject::NAME).as_deref(),
      Some("tok")
    );
  }

  #[tokio::test]
  async fn test_token_is_attached_while_verifying() {
    let transport = Arc::new(ScriptedTransport::new());
    let token = AccountToken::new("tok");
    let verification = transport.gate::<GetAccountByAccountToken>(&token);
    let project_id = ProjectId::new("p");
    transport.reply::<GetProject>(&project_id, &Timestamped::new(None, at(1)));

    let mut store = store(&transport);
    store.log_in(token.clone()).await;
    store.request::<Projects>(&project_id);
    store.dispatch();
    assert!(store.wait_for_change().await);

    assert_eq!(store.get::<Projects>(&project_id), &ResourceState::Deleted(at(1)));
    assert_eq!(store.log_in_state(), &LogInState::VerifyingToken(token.clone()));
    assert_eq!(
      transport.last_token_for(GetProject::NAME).as_deref(),
      Some("tok")
    );

    // The verification reply never arrives: the token is kept for later.
    verification.fail();
    store.settle().await;
    assert_eq!(store.log_in_state(), &LogInState::Guest);
    assert_eq!(store.cache.read_token().await, Some(token));
  }

  #[tokio::test]
  async fn test_restore_session_with_rejected_token() {
    let transport = Arc::new(ScriptedTransport::new());
    let token = AccountToken::new("expired");
    transport.reply::<GetAccountByAccountToken>(&token, &None);

    let mut store = store(&transport);
    store.cache.write_token(&token).await;
    assert!(store.restore_session().await);
    store.settle().await;

    assert_eq!(store.log_in_state(), &LogInState::Guest);
    assert_eq!(store.cache.read_token().await, None);
  }

  #[tokio::test]
  async fn test_unverifiable_token_is_kept() {
    let transport = Arc::new(ScriptedTransport::new());
    let token = AccountToken::new("tok");
    transport.fail::<GetAccountByAccountToken>(&token);

    let mut store = store(&transport);
    store.log_in(token.clone()).await;
    store.settle().await;

    assert_eq!(store.log_in_state(), &LogInState::Guest);
    assert_eq!(store.cache.read_token().await, Some(token));
  }

  #[tokio::test]
  async fn test_log_out_supersedes_pending_verification() {
    let transport = Arc::new(ScriptedTransport::new());
    let token = AccountToken::new("tok");
    let gate = transport.gate::<GetAccountByAccountToken>(&token);

    let mut store = store(&transport);
    store.log_in(token).await;
    store.log_out().await;
    gate.release(&Some(IdAndData {
      id: AccountId::new("a1"),
      data: account("Ann"),
    }));
    store.settle().await;

    assert_eq!(store.log_in_state(), &LogInState::Guest);
    assert_eq!(store.cache.read_token().await, None);
  }

  #[tokio::test]
  async fn test_changes_are_published() {
    let transport = Arc::new(ScriptedTransport::new());
    let id = ProjectId::new("p");
    transport.reply::<GetProject>(&id, &Timestamped::new(Some(project("Foo")), at(1)));

    let mut store = store(&transport);
    let mut changes = store.subscribe();
    assert!(!changes.has_changed().unwrap());

    store.request::<Projects>(&id);
    assert!(changes.has_changed().unwrap());
    changes.borrow_and_update();

    store.settle().await;
    assert!(changes.has_changed().unwrap());
  }

  #[tokio::test]
  async fn test_request_log_in_url() {
    let transport = Arc::new(ScriptedTransport::new());
    let request = LogInUrlRequest {
      provider: OpenIdConnectProvider::GitHub,
      location: "https://definy.app/".to_string(),
    };
    transport.reply::<RequestLogInUrl>(&request, &"https://github.com/login".to_string());

    let store = store(&transport);
    let url = store
      .request_log_in_url(OpenIdConnectProvider::GitHub, "https://definy.app/")
      .await;
    assert_eq!(url.as_deref(), Some("https://github.com/login"));
    let missing = store
      .request_log_in_url(OpenIdConnectProvider::Google, "https://definy.app/")
      .await;
    assert_eq!(missing, None);
  }
}

use futures::future::{BoxFuture, FutureExt};
use tracing::warn;

use crate::api::operations::{GetAccount, GetImageFile, GetProject, GetTypePart};
use crate::api::types::{
  Account, AccountId, AccountToken, Binary, ImageHash, Project, ProjectId, Snapshot, Timestamp,
  Timestamped, TypePart, TypePartId,
};
use crate::api::ApiClient;
use crate::cache::{Cacheable, EntityKind};

use super::state::ResourceMap;
use super::store::{Completion, Fetched};

/// A kind of entity the store can fetch by id.
pub trait Resource: Cacheable {
  /// Immutable entries are never considered stale.
  const IMMUTABLE: bool = false;

  /// One network round trip for `id`. `None` when the call failed.
  fn fetch(
    api: ApiClient,
    id: Self::Id,
    token: Option<AccountToken>,
  ) -> BoxFuture<'static, Option<Snapshot<Self::Data>>>;

  fn map(maps: &ResourceMaps) -> &ResourceMap<Self::Id, Self::Data>;

  fn map_mut(maps: &mut ResourceMaps) -> &mut ResourceMap<Self::Id, Self::Data>;

  fn completion(id: Self::Id, fetched: Fetched<Self::Data>) -> Completion;
}

/// The in-memory state of every entity kind.
#[derive(Debug, Default)]
pub struct ResourceMaps {
  pub projects: ResourceMap<ProjectId, Project>,
  pub accounts: ResourceMap<AccountId, Account>,
  pub type_parts: ResourceMap<TypePartId, TypePart>,
  pub images: ResourceMap<ImageHash, Binary>,
}

/// Defines a marker type for a kind fetched by a single `O: Id -> Snapshot`
/// operation.
macro_rules! snapshot_resource {
  ($name:ident, $kind:ident, $operation:ty, $id:ty, $data:ty, $field:ident) => {
    pub struct $name;

    impl Cacheable for $name {
      type Id = $id;
      type Data = $data;
      const KIND: EntityKind = EntityKind::$kind;
    }

    impl Resource for $name {
      fn fetch(
        api: ApiClient,
        id: $id,
        token: Option<AccountToken>,
      ) -> BoxFuture<'static, Option<Snapshot<$data>>> {
        async move { api.call::<$operation>(&id, token.as_ref()).await }.boxed()
      }

      fn map(maps: &ResourceMaps) -> &ResourceMap<$id, $data> {
        &maps.$field
      }

      fn map_mut(maps: &mut ResourceMaps) -> &mut ResourceMap<$id, $data> {
        &mut maps.$field
      }

      fn completion(id: $id, fetched: Fetched<$data>) -> Completion {
        Completion::$kind(id, fetched)
      }
    }
  };
}

snapshot_resource!(Projects, Project, GetProject, ProjectId, Project, projects);
snapshot_resource!(Accounts, Account, GetAccount, AccountId, Account, accounts);
snapshot_resource!(TypeParts, TypePart, GetTypePart, TypePartId, TypePart, type_parts);

/// Image files, addressed by content hash.
pub struct Images;

impl Cacheable for Images {
  type Id = ImageHash;
  type Data = Binary;
  const KIND: EntityKind = EntityKind::Image;
}

impl Resource for Images {
  const IMMUTABLE: bool = true;

  fn fetch(
    api: ApiClient,
    hash: ImageHash,
    token: Option<AccountToken>,
  ) -> BoxFuture<'static, Option<Snapshot<Binary>>> {
    async move {
      let binary = api.call::<GetImageFile>(&hash, token.as_ref()).await?;
      if !hash.matches(&binary.0) {
        warn!(%hash, bytes = binary.0.len(), "image content does not match its hash");
        return None;
      }
      // The server sends no timestamp for images; content never changes.
      Some(Timestamped::new(Some(binary), Timestamp::now()))
    }
    .boxed()
  }

  fn map(maps: &ResourceMaps) -> &ResourceMap<ImageHash, Binary> {
    &maps.images
  }

  fn map_mut(maps: &mut ResourceMaps) -> &mut ResourceMap<ImageHash, Binary> {
    &mut maps.images
  }

  fn completion(hash: ImageHash, fetched: Fetched<Binary>) -> Completion {
    Completion::Image(hash, fetched)
  }
}

//! In-memory view of remote entities and the fetches that keep it current.
//!
//! Each entity kind has a [`ResourceMap`] of [`ResourceState`]s. Callers
//! `request` what they want to see, `dispatch` turns pending requests into
//! network calls, and completions are merged back with a freshness check so
//! that an older response never replaces a newer one.

mod kind;
mod state;
mod store;

pub use kind::{Accounts, Images, Projects, Resource, ResourceMaps, TypeParts};
pub use state::{ResourceMap, ResourceState};
pub use store::{BulkQuery, Completion, Fetched, LogInState, ResourceStore};

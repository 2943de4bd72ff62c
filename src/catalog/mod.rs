//! Read-only access to published elections.

use crate::error::Result;
use crate::model::{common::ElectionId, election::Election};

mod memory;
mod mongo;

pub use memory::InMemoryCatalog;
pub use mongo::MongoCatalog;

/// Provider of elections and their candidate lists.
///
/// Implementations have no side effects. Unknown IDs fail with
/// [`Error::UnknownElection`](crate::error::Error::UnknownElection); data
/// source failures surface as
/// [`Error::CatalogUnavailable`](crate::error::Error::CatalogUnavailable) and
/// are left to the caller to retry.
#[rocket::async_trait]
pub trait ElectionCatalog: Send + Sync {
    async fn list_elections(&self) -> Result<Vec<Election>>;

    async fn get_election(&self, id: ElectionId) -> Result<Election>;
}

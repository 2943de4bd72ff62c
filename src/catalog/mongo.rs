use mongodb::{bson::doc, error::Error as DbError, options::FindOptions, Database};
use rocket::futures::TryStreamExt;

use crate::error::{Error, Result};
use crate::model::{common::ElectionId, election::Election, mongodb::Coll};

use super::ElectionCatalog;

/// Elections read from the `elections` collection.
#[derive(Clone)]
pub struct MongoCatalog {
    elections: Coll<Election>,
}

impl MongoCatalog {
    pub fn new(db: &Database) -> Self {
        Self {
            elections: Coll::from_db(db),
        }
    }
}

fn unavailable(err: DbError) -> Error {
    warn!("Election catalog query failed: {err}");
    Error::CatalogUnavailable(err.to_string())
}

#[rocket::async_trait]
impl ElectionCatalog for MongoCatalog {
    async fn list_elections(&self) -> Result<Vec<Election>> {
        let options = FindOptions::builder().sort(doc! { "_id": 1 }).build();
        self.elections
            .find(None, options)
            .await
            .map_err(unavailable)?
            .try_collect()
            .await
            .map_err(unavailable)
    }

    async fn get_election(&self, id: ElectionId) -> Result<Election> {
        self.elections
            .find_one(doc! { "_id": id }, None)
            .await
            .map_err(unavailable)?
            .ok_or(Error::UnknownElection(id))
    }
}

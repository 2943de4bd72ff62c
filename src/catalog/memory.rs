use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::model::{api::ElectionSpec, common::ElectionId, election::Election};

use super::ElectionCatalog;

/// A fixed set of elections held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    elections: BTreeMap<ElectionId, Election>,
}

impl InMemoryCatalog {
    pub fn new(elections: impl IntoIterator<Item = Election>) -> Self {
        Self {
            elections: elections.into_iter().map(|e| (e.id, e)).collect(),
        }
    }

    /// Load elections from a JSON file holding an array of [`ElectionSpec`]s.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let specs: Vec<ElectionSpec> = rocket::serde::json::from_str(&json)
            .map_err(|e| Error::Config(format!("cannot parse {}: {e}", path.display())))?;
        info!("Loaded {} election(s) from {}", specs.len(), path.display());
        Ok(Self::new(specs.into_iter().map(Election::from)))
    }
}

#[rocket::async_trait]
impl ElectionCatalog for InMemoryCatalog {
    async fn list_elections(&self) -> Result<Vec<Election>> {
        Ok(self.elections.values().cloned().collect())
    }

    async fn get_election(&self, id: ElectionId) -> Result<Election> {
        self.elections
            .get(&id)
            .cloned()
            .ok_or(Error::UnknownElection(id))
    }
}

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Duration;
use mongodb::{Client as MongoClient, Database};
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::catalog::{ElectionCatalog, InMemoryCatalog, MongoCatalog};
use crate::error::{Error, Result};
use crate::ledger::{InMemoryLedger, MongoLedger, VoteLedger};
use crate::model::{
    common::VoterId,
    face::{FaceTemplate, ReferenceFaceMatcher},
    mongodb::{ensure_indexes_exist, ensure_vote_sequence_counter_exists, Coll},
    otp::{InMemoryOtpChannel, LogDelivery},
    session::AttemptLimits,
};
use crate::services::Services;
use crate::workflow::WorkflowRegistry;

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // non-secrets
    otp_ttl: u32,
    otp_resend_cooldown: u32,
    session_ttl: u32,
    face_attempts: u32,
    otp_attempts: u32,
    face_match_threshold: f32,
    // secrets
    jwt_secret: String,
}

impl Config {
    /// Valid lifetime of a one-time code.
    pub fn otp_ttl(&self) -> Duration {
        Duration::seconds(self.otp_ttl.into())
    }

    /// Minimum wait before another code is sent to the same session.
    pub fn otp_resend_cooldown(&self) -> Duration {
        Duration::seconds(self.otp_resend_cooldown.into())
    }

    /// How long a verification session or workflow may sit idle.
    pub fn session_ttl(&self) -> Duration {
        Duration::seconds(self.session_ttl.into())
    }

    /// Failures allowed per factor before the session is locked.
    pub fn attempt_limits(&self) -> AttemptLimits {
        AttemptLimits {
            face: self.face_attempts,
            otp: self.otp_attempts,
        }
    }

    /// Minimum cosine similarity for a face match.
    pub fn face_match_threshold(&self) -> f32 {
        self.face_match_threshold
    }

    /// Secret key used to verify voter identity JWTs.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }
}

#[cfg(test)]
impl Config {
    pub fn example() -> Self {
        Self {
            otp_ttl: 300,
            otp_resend_cooldown: 0,
            session_ttl: 900,
            face_attempts: 3,
            otp_attempts: 3,
            face_match_threshold: 0.85,
            jwt_secret: "example-jwt-secret".to_string(),
        }
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Where elections and votes are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Memory,
    Mongodb,
}

/// Configuration for the storage backends.
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    storage: Backend,
    // secrets
    db_uri: Option<String>,
    /// Elections to serve from memory, as a JSON array.
    elections_file: Option<PathBuf>,
    /// Enrolled face references, as a JSON object of voter ID to template.
    face_references_file: Option<PathBuf>,
}

/// A fairing that builds the [`Services`] described by the storage config,
/// connecting to and preparing the database if needed, and places them and a
/// [`WorkflowRegistry`] into managed state.
///
/// Must be attached after [`ConfigFairing`].
pub struct ServicesFairing;

#[rocket::async_trait]
impl Fairing for ServicesFairing {
    fn info(&self) -> Info {
        Info {
            name: "Services",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let storage = match rocket.figment().extract::<StorageConfig>() {
            Ok(storage) => storage,
            Err(e) => {
                error!("Failed to load storage config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        let Some(config) = rocket.state::<Config>().cloned() else {
            error!("Application config must be loaded before services");
            return Err(rocket);
        };

        // Build the services.
        let services = match build_services(&config, &storage).await {
            Ok(services) => services,
            Err(e) => {
                error!("Failed to start services: {e}");
                return Err(rocket);
            }
        };
        let registry = WorkflowRegistry::new(
            services.clone(),
            config.attempt_limits(),
            config.session_ttl(),
        );

        // Manage the state.
        rocket = rocket.manage(services).manage(registry);
        Ok(rocket)
    }
}

async fn build_services(config: &Config, storage: &StorageConfig) -> Result<Services> {
    let (catalog, ledger): (Arc<dyn ElectionCatalog>, Arc<dyn VoteLedger>) = match storage.storage
    {
        Backend::Memory => {
            let catalog: Arc<dyn ElectionCatalog> = match &storage.elections_file {
                Some(path) => Arc::new(InMemoryCatalog::from_json_file(path)?),
                None => {
                    warn!("No `elections_file` set, serving no elections");
                    Arc::new(InMemoryCatalog::default())
                }
            };
            let ledger = Arc::new(InMemoryLedger::new(catalog.clone()));
            info!("Using in-memory storage");
            (catalog, ledger)
        }
        Backend::Mongodb => {
            let Some(db_uri) = &storage.db_uri else {
                return Err(Error::Config(
                    "`db_uri` must be set for mongodb storage".to_string(),
                ));
            };
            info!("Loaded database config, connecting...");
            let client = MongoClient::with_uri_str(db_uri).await?;
            let db = client.database(&get_database_name());
            prepare_database(&db).await?;
            info!("...database connection online!");

            let catalog: Arc<dyn ElectionCatalog> = Arc::new(MongoCatalog::new(&db));
            let ledger = Arc::new(MongoLedger::new(client, &db, catalog.clone()));
            (catalog, ledger)
        }
    };

    let faces = ReferenceFaceMatcher::new(config.face_match_threshold());
    match &storage.face_references_file {
        Some(path) => faces.enroll_all(load_face_references(path)?).await,
        None => warn!("No `face_references_file` set, no voter can pass face verification"),
    }

    let otp = InMemoryOtpChannel::new(
        Arc::new(LogDelivery),
        config.otp_ttl(),
        config.otp_resend_cooldown(),
    );

    Ok(Services {
        catalog,
        ledger,
        faces: Arc::new(faces),
        otp: Arc::new(otp),
    })
}

/// Ensure the required indexes and the vote sequence counter exist.
async fn prepare_database(db: &Database) -> Result<()> {
    ensure_indexes_exist(db).await?;
    ensure_vote_sequence_counter_exists(&Coll::from_db(db)).await?;
    Ok(())
}

fn load_face_references(path: &Path) -> Result<HashMap<VoterId, FaceTemplate>> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
    rocket::serde::json::from_str(&json)
        .map_err(|e| Error::Config(format!("cannot parse {}: {e}", path.display())))
}

/// Get the name of the database to use.
fn get_database_name() -> String {
    "evote".to_string()
}

use std::sync::Arc;

use crate::catalog::ElectionCatalog;
use crate::ledger::VoteLedger;
use crate::model::{face::FaceMatcher, otp::OtpChannel};

/// The collaborators every workflow is built from.
///
/// Managed by rocket and shared by all workflows. Which implementations sit
/// behind the trait objects is decided by the storage config.
#[derive(Clone)]
pub struct Services {
    pub catalog: Arc<dyn ElectionCatalog>,
    pub ledger: Arc<dyn VoteLedger>,
    pub faces: Arc<dyn FaceMatcher>,
    pub otp: Arc<dyn OtpChannel>,
}

#[cfg(test)]
pub use fixtures::Fixtures;

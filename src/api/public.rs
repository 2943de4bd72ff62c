use rocket::{serde::json::Json, Route, State};
use serde::{Deserialize, Serialize};

use crate::catalog::ElectionCatalog;
use crate::error::Result;
use crate::ledger::VoteLedger;
use crate::model::{
    api::{ElectionDescription, ElectionSummary},
    common::ElectionId,
    transaction::VoteTransaction,
};
use crate::services::Services;

pub fn routes() -> Vec<Route> {
    routes![elections, election, transactions, verify_transactions]
}

#[get("/elections")]
async fn elections(services: &State<Services>) -> Result<Json<Vec<ElectionSummary>>> {
    let elections = services.catalog.list_elections().await?;
    Ok(Json(elections.iter().map(ElectionSummary::from).collect()))
}

#[get("/elections/<election_id>")]
async fn election(
    election_id: ElectionId,
    services: &State<Services>,
) -> Result<Json<ElectionDescription>> {
    let election = services.catalog.get_election(election_id).await?;
    let tally = services.ledger.tally(election_id).await?;
    Ok(Json(ElectionDescription::new(election, &tally)))
}

#[get("/transactions")]
async fn transactions(services: &State<Services>) -> Result<Json<Vec<VoteTransaction>>> {
    Ok(Json(services.ledger.list_transactions().await?))
}

/// Result of auditing the transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogAudit {
    pub valid: bool,
    /// Sequence number of the first entry that failed the audit.
    pub first_invalid: Option<u64>,
}

#[get("/transactions/verify")]
async fn verify_transactions(services: &State<Services>) -> Result<Json<LogAudit>> {
    let first_invalid = services.ledger.verify_log().await?;
    if let Some(sequence) = first_invalid {
        error!("Transaction log fails audit at sequence {sequence}");
    }
    Ok(Json(LogAudit {
        valid: first_invalid.is_none(),
        first_invalid,
    }))
}

use rocket::{serde::json::Json, Route, State};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    api::{AuthToken, WorkflowView},
    common::{CandidateId, ElectionId, SessionKey},
    face::FaceSample,
    otp::Code,
    transaction::VoteTransaction,
};
use crate::workflow::WorkflowRegistry;

pub fn routes() -> Vec<Route> {
    routes![
        workflow_status,
        verify_face,
        request_otp,
        submit_otp,
        select_election,
        select_candidate,
        cast_vote,
    ]
}

/// A one-time code typed in by the voter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpSubmission {
    pub code: Code,
}

/// The candidate the voter picked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateChoice {
    pub candidate_id: CandidateId,
}

/// Progress of a workflow the voter has already started.
#[get("/voter/elections/<election_id>/workflow")]
async fn workflow_status(
    token: AuthToken,
    election_id: ElectionId,
    registry: &State<WorkflowRegistry>,
) -> Result<Json<WorkflowView>> {
    let key = SessionKey::new(token.voter_id, election_id);
    let workflow = registry
        .existing(&key)
        .await
        .ok_or_else(|| Error::NotFound(format!("No voting workflow for {key}")))?;
    let workflow = workflow.lock().await;
    Ok(Json(WorkflowView::from(&*workflow)))
}

#[post("/voter/elections/<election_id>/verify/face", data = "<sample>", format = "json")]
async fn verify_face(
    token: AuthToken,
    election_id: ElectionId,
    sample: Json<FaceSample>,
    registry: &State<WorkflowRegistry>,
) -> Result<Json<WorkflowView>> {
    let workflow = registry
        .workflow(SessionKey::new(token.voter_id, election_id))
        .await;
    let mut workflow = workflow.lock().await;
    workflow.verify_face(&sample).await?;
    Ok(Json(WorkflowView::from(&*workflow)))
}

#[post("/voter/elections/<election_id>/verify/otp/request")]
async fn request_otp(
    token: AuthToken,
    election_id: ElectionId,
    registry: &State<WorkflowRegistry>,
) -> Result<Json<WorkflowView>> {
    let workflow = registry
        .workflow(SessionKey::new(token.voter_id, election_id))
        .await;
    let mut workflow = workflow.lock().await;
    workflow.request_otp().await?;
    Ok(Json(WorkflowView::from(&*workflow)))
}

#[post("/voter/elections/<election_id>/verify/otp", data = "<submission>", format = "json")]
async fn submit_otp(
    token: AuthToken,
    election_id: ElectionId,
    submission: Json<OtpSubmission>,
    registry: &State<WorkflowRegistry>,
) -> Result<Json<WorkflowView>> {
    let workflow = registry
        .workflow(SessionKey::new(token.voter_id, election_id))
        .await;
    let mut workflow = workflow.lock().await;
    workflow.submit_otp(&submission.code).await?;
    Ok(Json(WorkflowView::from(&*workflow)))
}

#[post("/voter/elections/<election_id>/select")]
async fn select_election(
    token: AuthToken,
    election_id: ElectionId,
    registry: &State<WorkflowRegistry>,
) -> Result<Json<WorkflowView>> {
    let workflow = registry
        .workflow(SessionKey::new(token.voter_id, election_id))
        .await;
    let mut workflow = workflow.lock().await;
    workflow.select_election(election_id).await?;
    Ok(Json(WorkflowView::from(&*workflow)))
}

#[post("/voter/elections/<election_id>/candidate", data = "<choice>", format = "json")]
async fn select_candidate(
    token: AuthToken,
    election_id: ElectionId,
    choice: Json<CandidateChoice>,
    registry: &State<WorkflowRegistry>,
) -> Result<Json<WorkflowView>> {
    let workflow = registry
        .workflow(SessionKey::new(token.voter_id, election_id))
        .await;
    let mut workflow = workflow.lock().await;
    workflow.select_candidate(choice.candidate_id)?;
    Ok(Json(WorkflowView::from(&*workflow)))
}

#[post("/voter/elections/<election_id>/cast")]
async fn cast_vote(
    token: AuthToken,
    election_id: ElectionId,
    registry: &State<WorkflowRegistry>,
) -> Result<Json<VoteTransaction>> {
    let workflow = registry
        .workflow(SessionKey::new(token.voter_id, election_id))
        .await;
    let mut workflow = workflow.lock().await;
    Ok(Json(workflow.cast_vote().await?))
}

#[cfg(test)]
mod tests {
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::{Client, LocalResponse},
        serde::json::{serde_json, serde_json::json},
    };

    use super::*;
    use crate::ledger::VoteLedger;
    use crate::model::{api::ElectionDescription, session::VerificationStep};
    use crate::services::Fixtures;

    async fn view(response: LocalResponse<'_>) -> WorkflowView {
        let raw_response = response.into_string().await.unwrap();
        serde_json::from_str(&raw_response).unwrap()
    }

    /// Walk `voter` through both factors for election 42.
    async fn verify(client: &Client, fixtures: &Fixtures, voter: &str) {
        let auth = AuthToken::example_header(voter, &fixtures.config);

        let response = client
            .post(uri!(verify_face(42)))
            .header(auth.clone())
            .header(ContentType::JSON)
            .body(json!(FaceSample::matching()).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        assert_eq!(view(response).await.verification.step, VerificationStep::FacePassed);

        let response = client
            .post(uri!(request_otp(42)))
            .header(auth.clone())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let code = fixtures
            .delivery
            .last_code(&SessionKey::new(voter.into(), 42))
            .unwrap();
        let response = client
            .post(uri!(submit_otp(42)))
            .header(auth)
            .header(ContentType::JSON)
            .body(json!(OtpSubmission { code }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        assert_eq!(view(response).await.state, "AwaitingElectionChoice");
    }

    async fn choose(client: &Client, fixtures: &Fixtures, voter: &str, candidate_id: CandidateId) {
        let auth = AuthToken::example_header(voter, &fixtures.config);
        let response = client
            .post(uri!(select_election(42)))
            .header(auth.clone())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let response = client
            .post(uri!(select_candidate(42)))
            .header(auth)
            .header(ContentType::JSON)
            .body(json!(CandidateChoice { candidate_id }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let view = view(response).await;
        assert_eq!(view.state, "CandidateChosen");
        assert_eq!(view.selected_candidate, Some(candidate_id));
    }

    #[backend_test]
    async fn cast_vote_end_to_end(client: Client, fixtures: Fixtures) {
        verify(&client, &fixtures, "v1").await;
        choose(&client, &fixtures, "v1", 101).await;

        let auth = AuthToken::example_header("v1", &fixtures.config);
        let response = client
            .post(uri!(cast_vote(42)))
            .header(auth.clone())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let raw_response = response.into_string().await.unwrap();
        let tx = serde_json::from_str::<VoteTransaction>(&raw_response).unwrap();
        assert_eq!(tx.voter_id.as_str(), "v1");
        assert_eq!(tx.candidate_id, 101);
        assert!(tx.verify());

        let response = client
            .get(uri!(workflow_status(42)))
            .header(auth.clone())
            .dispatch()
            .await;
        let status = view(response).await;
        assert_eq!(status.state, "Confirmed");
        assert!(status.finished);
        assert_eq!(status.transaction, Some(tx));

        // Casting again is refused without touching the ledger.
        let response = client.post(uri!(cast_vote(42))).header(auth).dispatch().await;
        assert_eq!(Status::Conflict, response.status());
        let raw_response = response.into_string().await.unwrap();
        assert!(raw_response.contains("AlreadyVoted"));
        assert_eq!(
            fixtures
                .services
                .ledger
                .list_transactions()
                .await
                .unwrap()
                .len(),
            1
        );

        let response = client.get("/elections/42").dispatch().await;
        let raw_response = response.into_string().await.unwrap();
        let description = serde_json::from_str::<ElectionDescription>(&raw_response).unwrap();
        assert_eq!(description.candidates[0].vote_count, 1);
        assert_eq!(description.candidates[1].vote_count, 0);
    }

    #[backend_test]
    async fn cast_requires_verification(client: Client, fixtures: Fixtures) {
        let auth = AuthToken::example_header("v1", &fixtures.config);
        let response = client.post(uri!(cast_vote(42))).header(auth).dispatch().await;
        assert_eq!(Status::Conflict, response.status());
        assert!(fixtures
            .services
            .ledger
            .list_transactions()
            .await
            .unwrap()
            .is_empty());
    }

    #[backend_test]
    async fn already_voted_is_rejected(client: Client, fixtures: Fixtures) {
        fixtures
            .services
            .ledger
            .record_vote(&"v2".into(), 42, 102)
            .await
            .unwrap();
        verify(&client, &fixtures, "v2").await;
        choose(&client, &fixtures, "v2", 101).await;

        let auth = AuthToken::example_header("v2", &fixtures.config);
        let response = client
            .post(uri!(cast_vote(42)))
            .header(auth.clone())
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());
        let raw_response = response.into_string().await.unwrap();
        assert!(raw_response.contains("AlreadyVoted"));

        let response = client
            .get(uri!(workflow_status(42)))
            .header(auth)
            .dispatch()
            .await;
        assert_eq!(view(response).await.state, "Rejected");
    }

    #[backend_test]
    async fn face_mismatch_is_unauthorized(client: Client, fixtures: Fixtures) {
        let auth = AuthToken::example_header("v1", &fixtures.config);
        let response = client
            .post(uri!(verify_face(42)))
            .header(auth)
            .header(ContentType::JSON)
            .body(json!(FaceSample::stranger()).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Unauthorized, response.status());
        let raw_response = response.into_string().await.unwrap();
        assert!(raw_response.contains("VerificationFailed"));
    }

    #[backend_test]
    async fn status_does_not_start_a_workflow(client: Client, fixtures: Fixtures) {
        let auth = AuthToken::example_header("v1", &fixtures.config);
        let response = client
            .get(uri!(workflow_status(42)))
            .header(auth.clone())
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());

        let registry = client.rocket().state::<WorkflowRegistry>().unwrap();
        assert_eq!(registry.len().await, 0);

        let response = client
            .post(uri!(verify_face(42)))
            .header(auth.clone())
            .header(ContentType::JSON)
            .body(json!(FaceSample::matching()).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());

        let response = client
            .get(uri!(workflow_status(42)))
            .header(auth)
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let status = view(response).await;
        assert_eq!(status.state, "AwaitingVerification");
        assert!(!status.finished);
        assert_eq!(registry.len().await, 1);
    }

    #[backend_test]
    async fn identity_is_required(client: Client) {
        let response = client.get(uri!(workflow_status(42))).dispatch().await;
        assert_eq!(Status::Unauthorized, response.status());

        let response = client
            .post(uri!(cast_vote(42)))
            .header(rocket::http::Header::new("Authorization", "Bearer not-a-jwt"))
            .dispatch()
            .await;
        assert_eq!(Status::Unauthorized, response.status());
    }
}

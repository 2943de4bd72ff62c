//! API-facing views and request bodies.

pub mod auth;
mod election;
mod workflow;

pub use auth::{AuthToken, AUTH_TOKEN_COOKIE};
pub use election::{ElectionDescription, ElectionSpec, ElectionSummary};
pub use workflow::{VerificationView, WorkflowView};

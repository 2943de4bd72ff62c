//! The face-match factor.
//!
//! Capture and feature extraction happen on the voter's device; we receive
//! an embedding and compare it with the reference enrolled for the voter.

use std::collections::HashMap;

use rocket::tokio::sync::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{common::VoterId, session::FaceResult};

/// A face embedding, as produced by the capture device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaceTemplate(pub Vec<f32>);

impl FaceTemplate {
    /// Cosine similarity in `[-1, 1]`. Templates of different dimensions,
    /// or with a zero vector, are not comparable and score 0.
    pub fn similarity(&self, other: &FaceTemplate) -> f32 {
        if self.0.len() != other.0.len() || self.0.is_empty() {
            return 0.0;
        }
        let dot: f32 = self.0.iter().zip(&other.0).map(|(a, b)| a * b).sum();
        let norm = |v: &[f32]| v.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norms = norm(&self.0) * norm(&other.0);
        if norms == 0.0 {
            0.0
        } else {
            dot / norms
        }
    }
}

/// A freshly captured sample submitted for verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceSample {
    pub embedding: FaceTemplate,
}

/// Verdict of a face evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FaceOutcome {
    Matched { confidence: f32 },
    Mismatched { confidence: f32 },
    /// There is nothing to compare against; retrying cannot help.
    NoReferenceEnrolled,
}

impl FaceOutcome {
    /// The session signal for this outcome, if it is a verdict at all.
    pub fn result(&self) -> Option<FaceResult> {
        match self {
            Self::Matched { .. } => Some(FaceResult::Matched),
            Self::Mismatched { .. } => Some(FaceResult::Mismatched),
            Self::NoReferenceEnrolled => None,
        }
    }
}

/// Compares a captured sample with the voter's registered reference.
#[rocket::async_trait]
pub trait FaceMatcher: Send + Sync {
    async fn evaluate(&self, voter_id: &VoterId, sample: &FaceSample) -> Result<FaceOutcome>;
}

/// Matches by cosine similarity against in-memory reference templates.
pub struct ReferenceFaceMatcher {
    references: RwLock<HashMap<VoterId, FaceTemplate>>,
    threshold: f32,
}

impl ReferenceFaceMatcher {
    pub fn new(threshold: f32) -> Self {
        Self {
            references: Default::default(),
            threshold,
        }
    }

    /// Register (or replace) the reference template for a voter.
    pub async fn enroll(&self, voter_id: VoterId, template: FaceTemplate) {
        info!("Enrolled face reference for voter {voter_id}");
        self.references.write().await.insert(voter_id, template);
    }

    /// Load many references at once, e.g. from an enrollment export.
    pub async fn enroll_all(&self, references: impl IntoIterator<Item = (VoterId, FaceTemplate)>) {
        let mut map = self.references.write().await;
        map.extend(references);
        info!("{} face reference(s) enrolled", map.len());
    }
}

#[rocket::async_trait]
impl FaceMatcher for ReferenceFaceMatcher {
    async fn evaluate(&self, voter_id: &VoterId, sample: &FaceSample) -> Result<FaceOutcome> {
        let references = self.references.read().await;
        let Some(reference) = references.get(voter_id) else {
            return Ok(FaceOutcome::NoReferenceEnrolled);
        };
        let confidence = reference.similarity(&sample.embedding);
        if confidence >= self.threshold {
            Ok(FaceOutcome::Matched { confidence })
        } else {
            Ok(FaceOutcome::Mismatched { confidence })
        }
    }
}

/// Example data for tests.
#[cfg(test)]
pub mod examples {
    use super::*;

    impl FaceTemplate {
        pub fn example() -> Self {
            Self(vec![0.6, 0.8, 0.0, 0.0])
        }

        /// Orthogonal to [`FaceTemplate::example`].
        pub fn stranger() -> Self {
            Self(vec![0.0, 0.0, 1.0, 0.0])
        }
    }

    impl FaceSample {
        pub fn matching() -> Self {
            Self {
                embedding: FaceTemplate(vec![0.61, 0.79, 0.01, 0.0]),
            }
        }

        pub fn stranger() -> Self {
            Self {
                embedding: FaceTemplate::stranger(),
            }
        }
    }
}

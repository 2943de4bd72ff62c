use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use rocket::tokio::sync::Mutex;

use super::VotingWorkflow;
use crate::model::{common::SessionKey, session::AttemptLimits};
use crate::services::Services;

/// Live workflows, one per voter and election.
///
/// Callers lock the returned workflow for the length of an operation, which
/// serialises requests for the same voter. A workflow idle for longer than
/// the session TTL is dropped and the voter starts again from the beginning.
pub struct WorkflowRegistry {
    services: Services,
    limits: AttemptLimits,
    ttl: Duration,
    workflows: Mutex<HashMap<SessionKey, Arc<Mutex<VotingWorkflow>>>>,
}

impl WorkflowRegistry {
    pub fn new(services: Services, limits: AttemptLimits, ttl: Duration) -> Self {
        Self {
            services,
            limits,
            ttl,
            workflows: Mutex::new(HashMap::new()),
        }
    }

    /// Get the workflow for `key`, starting one if needed.
    pub async fn workflow(&self, key: SessionKey) -> Arc<Mutex<VotingWorkflow>> {
        let mut workflows = self.workflows.lock().await;
        self.evict_idle(&mut workflows);
        workflows
            .entry(key)
            .or_insert_with_key(|key| {
                debug!("Starting workflow for {key}");
                Arc::new(Mutex::new(VotingWorkflow::new(
                    &self.services,
                    key.clone(),
                    self.limits,
                    self.ttl,
                )))
            })
            .clone()
    }

    /// Get the workflow for `key` without starting one.
    pub async fn existing(&self, key: &SessionKey) -> Option<Arc<Mutex<VotingWorkflow>>> {
        let mut workflows = self.workflows.lock().await;
        self.evict_idle(&mut workflows);
        workflows.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.workflows.lock().await.len()
    }

    fn evict_idle(&self, workflows: &mut HashMap<SessionKey, Arc<Mutex<VotingWorkflow>>>) {
        let cutoff = Utc::now() - self.ttl;
        workflows.retain(|key, workflow| {
            // Handles are only cloned under the map lock, so a count above one
            // means a caller still holds this workflow.
            if Arc::strong_count(workflow) > 1 {
                return true;
            }
            match workflow.try_lock() {
                Ok(workflow) if workflow.last_activity() < cutoff => {
                    debug!("Expiring idle workflow for {key} ({})", workflow.state());
                    false
                }
                _ => true,
            }
        });
    }
}

//! Staged write sets.
//!
//! A [`Transaction`] collects writes without touching the database. Nothing
//! is visible to readers until [`Store::commit`](crate::Store::commit)
//! validates and applies the whole set atomically.

use ctf_range_core::{ChallengeId, LevelId};

use crate::types::{Challenge, Deployment, Level};

/// A single staged write.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Insert or replace a level.
    PutLevel(Level),
    /// Insert or replace a challenge.
    PutChallenge(Challenge),
    /// Insert or replace a deployment.
    PutDeployment(Deployment),
    /// Delete a level and, by cascade, its challenges and their deployments.
    DeleteLevel(LevelId),
    /// Delete a challenge and, by cascade, its deployment.
    DeleteChallenge(ChallengeId),
}

/// An ordered set of staged writes.
#[derive(Debug, Default)]
#[must_use = "a transaction does nothing until committed"]
pub struct Transaction {
    ops: Vec<WriteOp>,
}

impl Transaction {
    /// Start an empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a level insert or update.
    pub fn put_level(&mut self, level: Level) -> &mut Self {
        self.ops.push(WriteOp::PutLevel(level));
        self
    }

    /// Stage a challenge insert or update.
    pub fn put_challenge(&mut self, challenge: Challenge) -> &mut Self {
        self.ops.push(WriteOp::PutChallenge(challenge));
        self
    }

    /// Stage a deployment insert or update.
    pub fn put_deployment(&mut self, deployment: Deployment) -> &mut Self {
        self.ops.push(WriteOp::PutDeployment(deployment));
        self
    }

    /// Stage a cascading level delete.
    pub fn delete_level(&mut self, level_id: LevelId) -> &mut Self {
        self.ops.push(WriteOp::DeleteLevel(level_id));
        self
    }

    /// Stage a cascading challenge delete.
    pub fn delete_challenge(&mut self, challenge_id: ChallengeId) -> &mut Self {
        self.ops.push(WriteOp::DeleteChallenge(challenge_id));
        self
    }

    /// Number of staged writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Discard all staged writes.
    pub fn rollback(self) {
        if !self.ops.is_empty() {
            tracing::debug!(staged = self.ops.len(), "Transaction rolled back");
        }
    }

    /// Consume the transaction, yielding its writes in staging order.
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

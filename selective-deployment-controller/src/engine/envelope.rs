use std::fmt::Display;

use selective_deployment_core::delta::{extend_deletion_delta, merge_removed};

use crate::queue::QueueItem;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        })
    }
}

/// Unit of work queued for a selective deployment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub key: String,
    pub operation: Operation,
    pub delta: String,
}

impl Envelope {
    pub fn new(key: impl Into<String>, operation: Operation, delta: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            operation,
            delta: delta.into(),
        }
    }

    pub fn create(key: impl Into<String>) -> Self {
        Self::new(key, Operation::Create, String::new())
    }
}

impl QueueItem for Envelope {
    fn key(&self) -> &str {
        &self.key
    }

    /// Removed controllers carried by a pending update survive every merge.
    fn coalesce(self, newer: Self) -> Self {
        match (self.operation, newer.operation) {
            (Operation::Update, Operation::Delete) => Envelope {
                delta: extend_deletion_delta(&newer.delta, &self.delta),
                ..newer
            },
            (Operation::Update, Operation::Create) if !self.delta.is_empty() => self,
            (_, Operation::Delete | Operation::Create) => newer,
            (Operation::Create, Operation::Update) if !newer.delta.is_empty() => newer,
            (Operation::Create | Operation::Delete, Operation::Update) => self,
            (Operation::Update, Operation::Update) => Envelope {
                delta: merge_removed(&self.delta, &newer.delta),
                ..newer
            },
        }
    }
}

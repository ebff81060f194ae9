//! Step-sequenced execution of multi-row writes
//!
//! The store offers no multi-statement transaction at this layer, so each
//! write is a sequence of named steps. A step only runs if every earlier
//! step succeeded, and each step documents what has already been committed
//! when it fails. The saga records progress so the caller can decide on
//! compensation.

use bookshelf_common::errors::Result;
use std::fmt;
use std::future::Future;
use tracing::{debug, warn};

/// A named step of a multi-row write
pub trait SagaStep: Copy + Eq + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Committed state left behind when this step fails
    fn abort_state(&self) -> &'static str;
}

/// Steps of book creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateStep {
    CheckDuplicate,
    InsertBook,
    InsertStatus,
    InsertRating,
    LinkTags,
}

impl SagaStep for CreateStep {
    fn name(&self) -> &'static str {
        match self {
            CreateStep::CheckDuplicate => "check_duplicate",
            CreateStep::InsertBook => "insert_book",
            CreateStep::InsertStatus => "insert_status",
            CreateStep::InsertRating => "insert_rating",
            CreateStep::LinkTags => "link_tags",
        }
    }

    fn abort_state(&self) -> &'static str {
        match self {
            CreateStep::CheckDuplicate | CreateStep::InsertBook => "nothing written",
            CreateStep::InsertStatus => "book row written",
            CreateStep::InsertRating => "book and status rows written",
            CreateStep::LinkTags => "book, status and rating rows written; tags may exist unlinked",
        }
    }
}

/// Steps of book deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStep {
    LoadBook,
    Authorize,
    CountDependents,
    DeleteBook,
    WriteAudit,
}

impl SagaStep for DeleteStep {
    fn name(&self) -> &'static str {
        match self {
            DeleteStep::LoadBook => "load_book",
            DeleteStep::Authorize => "authorize",
            DeleteStep::CountDependents => "count_dependents",
            DeleteStep::DeleteBook => "delete_book",
            DeleteStep::WriteAudit => "write_audit",
        }
    }

    fn abort_state(&self) -> &'static str {
        match self {
            DeleteStep::LoadBook | DeleteStep::CountDependents | DeleteStep::DeleteBook => {
                "nothing deleted"
            }
            DeleteStep::Authorize => "nothing deleted; denial recorded in the audit trail",
            DeleteStep::WriteAudit => "book and dependents deleted but unaudited",
        }
    }
}

/// Progress of one multi-row write
#[derive(Debug)]
pub struct Saga<S: SagaStep> {
    operation: &'static str,
    completed: Vec<S>,
}

impl<S: SagaStep> Saga<S> {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            completed: Vec::new(),
        }
    }

    /// Run one step, recording it as completed on success
    pub async fn run<T, F>(&mut self, step: S, action: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        debug!(operation = self.operation, step = step.name(), "Saga step started");

        match action.await {
            Ok(value) => {
                self.completed.push(step);
                Ok(value)
            }
            Err(e) => {
                warn!(
                    operation = self.operation,
                    step = step.name(),
                    abort_state = step.abort_state(),
                    error = %e,
                    "Saga aborted"
                );
                Err(e)
            }
        }
    }

    pub fn has_completed(&self, step: S) -> bool {
        self.completed.contains(&step)
    }

    pub fn completed(&self) -> &[S] {
        &self.completed
    }
}

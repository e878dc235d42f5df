use crate::error::ControllerError;

/// Result of one remove-handler pass
#[derive(Debug)]
pub enum Outcome {
    /// Teardown finished; the finalizer may be removed
    Done,
    /// Reconciled, but dependents still exist; keep the finalizer
    Waiting(String),
    /// The pass failed and should be retried with backoff
    Failed(ControllerError),
}

impl Outcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done)
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, Outcome::Waiting(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    /// The wait message, if waiting
    pub fn waiting_message(&self) -> Option<&str> {
        match self {
            Outcome::Waiting(message) => Some(message),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ControllerError> {
        match self {
            Outcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// The object as last persisted by a handler, plus what should happen next
#[derive(Debug)]
pub struct Reconciled<K> {
    pub object: K,
    pub outcome: Outcome,
}

impl<K> Reconciled<K> {
    pub fn new(object: K, outcome: Outcome) -> Self {
        Self { object, outcome }
    }

    pub fn done(object: K) -> Self {
        Self::new(object, Outcome::Done)
    }

    pub fn failed(object: K, err: impl Into<ControllerError>) -> Self {
        Self::new(object, Outcome::Failed(err.into()))
    }
}

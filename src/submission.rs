//! Per-chat submission state shared by every operation.
//!
//! `Idle -> Submitting -> {Succeeded, Failed}`. A validation failure is
//! reported without ever entering `Submitting`. The board only remembers
//! submissions that are in flight; a settled submission is handed back to the
//! caller and nothing of it is retained.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::validation::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission<T> {
    Idle,
    Submitting,
    Succeeded(T),
    Failed(String),
}

impl<T> Default for Submission<T> {
    fn default() -> Self {
        Submission::Idle
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("A request is already in progress. Please wait for it to finish.")]
pub struct SubmissionInProgress;

impl<T> Submission<T> {
    pub fn is_submitting(&self) -> bool {
        matches!(self, Submission::Submitting)
    }

    pub fn begin(&mut self) -> Result<(), SubmissionInProgress> {
        if self.is_submitting() {
            return Err(SubmissionInProgress);
        }
        *self = Submission::Submitting;
        Ok(())
    }

    pub fn complete(&mut self, outcome: Result<T, String>) {
        if !self.is_submitting() {
            warn!("Ignoring completion for a submission that is not in flight");
            return;
        }
        *self = match outcome {
            Ok(value) => Submission::Succeeded(value),
            Err(message) => Submission::Failed(message),
        };
    }

    /// Converts a settled submission into what the caller shows the user.
    ///
    /// `Idle` and `Submitting` never produced a result, so they report as busy.
    fn settle(self) -> SubmitOutcome<T> {
        match self {
            Submission::Succeeded(value) => SubmitOutcome::Succeeded(value),
            Submission::Failed(message) => SubmitOutcome::Failed(message),
            Submission::Idle | Submission::Submitting => SubmitOutcome::Busy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome<T> {
    Busy,
    Rejected(String),
    Succeeded(T),
    Failed(String),
}

type Slots<T> = Mutex<HashMap<i64, Submission<T>>>;

/// In-flight submissions for a single operation, one per chat.
#[derive(Debug)]
pub struct SubmissionBoard<T> {
    slots: Arc<Slots<T>>,
}

impl<T> Clone for SubmissionBoard<T> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<T> Default for SubmissionBoard<T> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Frees a slot when its submission settles or its future is dropped.
struct SlotGuard<'a, T> {
    slots: &'a Slots<T>,
    key: i64,
    released: bool,
}

impl<T> SlotGuard<'_, T> {
    fn release(mut self) -> Submission<T> {
        self.released = true;
        self.slots
            .lock()
            .remove(&self.key)
            .unwrap_or(Submission::Submitting)
    }
}

impl<T> Drop for SlotGuard<'_, T> {
    fn drop(&mut self) {
        if !self.released {
            self.slots.lock().remove(&self.key);
        }
    }
}

impl<T> SubmissionBoard<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_submitting(&self, key: i64) -> bool {
        self.slots
            .lock()
            .get(&key)
            .map(Submission::is_submitting)
            .unwrap_or(false)
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.slots.lock().len()
    }

    /// Runs one full cycle for `key`: validation outcome, dispatch, result.
    ///
    /// `call` is only invoked when `request` is `Ok` and no other submission
    /// for the same key is in flight.
    pub async fn submit<R, E, F, Fut>(
        &self,
        key: i64,
        request: Result<R, ValidationError>,
        call: F,
    ) -> SubmitOutcome<T>
    where
        E: ToString,
        F: FnOnce(R) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let request = match request {
            Ok(request) => request,
            Err(_) if self.is_submitting(key) => return SubmitOutcome::Busy,
            Err(err) => return SubmitOutcome::Rejected(err.to_string()),
        };

        let began = {
            let mut slots = self.slots.lock();
            slots.entry(key).or_default().begin()
        };
        if began.is_err() {
            return SubmitOutcome::Busy;
        }
        let slot = SlotGuard {
            slots: &self.slots,
            key,
            released: false,
        };

        let outcome = call(request).await.map_err(|err| err.to_string());

        let mut submission = slot.release();
        submission.complete(outcome);
        submission.settle()
    }
}

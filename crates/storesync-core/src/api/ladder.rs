//! Ordered request variants for one logical write.
//!
//! Some backend routes accept `PUT` with a JSON body, some reject the body
//! with 400/415, and some only accept `POST`. A `VerbLadder` lists the shapes
//! to try and which status moves on to which shape, so the fallback order is
//! data rather than nested error handling.

use std::future::Future;

use reqwest::Method;
use tracing::debug;

use super::ApiError;

/// Statuses that mean "drop the body and try again".
const BODY_REJECTED: &[u16] = &[400, 415];

/// Statuses that mean "this verb is not accepted here".
const VERB_REJECTED: &[u16] = &[405];

/// One request shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LadderStep {
    pub method: Method,
    pub with_body: bool,
    /// Failure statuses of an earlier step that lead to this one.
    /// Empty for the first step.
    pub entered_on: &'static [u16],
}

impl LadderStep {
    pub fn new(method: Method, with_body: bool, entered_on: &'static [u16]) -> Self {
        Self {
            method,
            with_body,
            entered_on,
        }
    }
}

impl std::fmt::Display for LadderStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.with_body {
            write!(f, "{} with body", self.method)
        } else {
            write!(f, "{} without body", self.method)
        }
    }
}

/// Result of a ladder run that reached a 2xx answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LadderSuccess {
    /// Index of the step that succeeded.
    pub step: usize,
    pub status: u16,
    pub attempts: usize,
}

#[derive(Debug, Clone)]
pub struct VerbLadder {
    steps: Vec<LadderStep>,
}

impl VerbLadder {
    pub fn new(steps: Vec<LadderStep>) -> Self {
        Self { steps }
    }

    /// `primary` with body, then without body on 400/415, then `POST` with
    /// body on 405.
    pub fn standard(primary: Method) -> Self {
        Self::new(vec![
            LadderStep::new(primary.clone(), true, &[]),
            LadderStep::new(primary, false, BODY_REJECTED),
            LadderStep::new(Method::POST, true, VERB_REJECTED),
        ])
    }

    pub fn steps(&self) -> &[LadderStep] {
        &self.steps
    }

    /// Step to try after step `current` failed with `status`.
    pub fn next_after(&self, current: usize, status: u16) -> Option<usize> {
        self.steps
            .iter()
            .enumerate()
            .skip(current + 1)
            .find(|(_, step)| step.entered_on.contains(&status))
            .map(|(index, _)| index)
    }

    /// Walk the ladder until a 2xx answer or a status with no next step.
    ///
    /// `attempt` performs one request and yields its HTTP status; an `Err`
    /// (no answer at all) stops the ladder immediately.
    pub async fn run<F, Fut>(&self, mut attempt: F) -> Result<LadderSuccess, ApiError>
    where
        F: FnMut(&LadderStep) -> Fut,
        Fut: Future<Output = Result<u16, ApiError>>,
    {
        let mut index = 0;
        let mut attempts = 0;

        while let Some(step) = self.steps.get(index) {
            attempts += 1;
            let status = attempt(step).await?;

            if (200..300).contains(&status) {
                return Ok(LadderSuccess {
                    step: index,
                    status,
                    attempts,
                });
            }

            match self.next_after(index, status) {
                Some(next) => {
                    debug!(status, from = %step, to = %self.steps[next], "Request variant rejected, falling back");
                    index = next;
                }
                None => {
                    return Err(ApiError::LadderExhausted {
                        attempts,
                        last_status: status,
                    });
                }
            }
        }

        Err(ApiError::InvalidResponse("Verb ladder has no steps".to_string()))
    }
}

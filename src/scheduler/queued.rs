// CLASSIFICATION: COMMUNITY
// Filename: queued.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-07-21

//! Queue entries tracking a code through its firmware round-trip.

use tokio::sync::oneshot;

use crate::code::{Code, CodeError};

/// Outcome delivered to whoever enqueued a code.
pub type CodeResult = Result<String, CodeError>;

/// Lifecycle of a queued code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeState {
    /// Waiting to be written to the firmware.
    Queued,
    /// Written; no reply fragment seen yet.
    Sent,
    /// At least one reply fragment arrived with the push flag set.
    AwaitingReply,
    /// Completed successfully.
    Finished,
    /// Completed with an error.
    Failed,
}

/// A code inside a channel queue, with its accumulated reply.
#[derive(Debug)]
pub struct QueuedCode {
    /// The code itself.
    pub code: Code,
    /// Current lifecycle state.
    pub state: CodeState,
    /// Whether the code originates from a firmware-requested macro and is
    /// not externally awaited.
    pub system: bool,
    /// Reply text accumulated across fragments.
    pub reply: String,
    /// Error slot, set when the reply carried the error severity.
    pub error: Option<CodeError>,
    completion: Option<oneshot::Sender<CodeResult>>,
}

impl QueuedCode {
    /// Wrap a code for queueing, returning the completion receiver.
    pub fn new(code: Code, system: bool) -> (Self, oneshot::Receiver<CodeResult>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                code,
                state: CodeState::Queued,
                system,
                reply: String::new(),
                error: None,
                completion: Some(tx),
            },
            rx,
        )
    }

    /// Whether the code reached `Finished` or `Failed`.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(self.state, CodeState::Finished | CodeState::Failed)
    }

    /// Deliver the terminal result to the waiting consumer.
    pub fn complete(&mut self) {
        let result = match self.error.take() {
            Some(err) => {
                self.state = CodeState::Failed;
                Err(err)
            }
            None => {
                self.state = CodeState::Finished;
                Ok(std::mem::take(&mut self.reply))
            }
        };
        if let Some(tx) = self.completion.take() {
            // The consumer may have gone away; that is not an error here.
            let _ = tx.send(result);
        }
    }

    /// Fail the code with `error` and deliver the result.
    pub fn fail(&mut self, error: CodeError) {
        self.error = Some(error);
        self.complete();
    }
}

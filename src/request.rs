//! Request handles for non-blocking point-to-point operations.

use crate::error::{Error, Result, TransportError};
use crate::status::Status;
use crate::transport::{Message, Outcome, Pending, TransportResult};

/// Finishes a receive: decodes the message into the caller's buffer.
pub(crate) type Sink<'a> = Box<dyn FnOnce(Message) -> TransportResult<Status> + 'a>;

enum State<'a> {
    Send { pending: Pending, status: Status },
    Receive { pending: Pending, sink: Sink<'a> },
    Complete,
}

/// Group and operation text attached to failures of this request.
struct Label {
    group: String,
    operation: String,
}

impl Label {
    fn failure(&self, source: TransportError) -> Error {
        Error::CommunicationFailure {
            group: self.group.clone(),
            operation: self.operation.clone(),
            source,
        }
    }
}

/// A handle to a non-blocking send or receive.
///
/// The request borrows the buffer it was started with for `'a`, so the buffer
/// cannot be touched until the request has been waited on (or dropped).
/// Dropping an unfinished request completes it first.
///
/// # Example
///
/// ```no_run
/// use ferrogroup::{LocalFabric, Request};
///
/// LocalFabric::run(2, |world| {
///     let peer = 1 - world.rank();
///     let send = vec![world.rank() as f64; 10];
///     let mut recv = vec![0.0; 10];
///
///     let requests = vec![
///         world.ireceive(&mut recv[..], peer, 0).unwrap(),
///         world.isend(&send[..], peer, 0).unwrap(),
///     ];
///
///     // Do other work while communication proceeds...
///
///     Request::wait_all(requests).unwrap();
///     assert_eq!(recv[0], peer as f64);
/// })
/// .unwrap();
/// ```
pub struct Request<'a> {
    state: State<'a>,
    label: Label,
    status: Option<Status>,
}

impl<'a> Request<'a> {
    pub(crate) fn send(pending: Pending, status: Status, group: String, operation: String) -> Self {
        Request {
            state: State::Send { pending, status },
            label: Label { group, operation },
            status: None,
        }
    }

    pub(crate) fn receive(
        pending: Pending,
        sink: Sink<'a>,
        group: String,
        operation: String,
    ) -> Self {
        Request {
            state: State::Receive { pending, sink },
            label: Label { group, operation },
            status: None,
        }
    }

    /// Check if this request has been completed.
    pub fn is_completed(&self) -> bool {
        matches!(self.state, State::Complete)
    }

    /// Status of the completed operation, `None` while it is in flight.
    pub fn status(&self) -> Option<Status> {
        self.status
    }

    /// Wait for this operation to complete.
    ///
    /// For a receive the buffer holds the message once this returns; for a
    /// send the buffer may be reused. The returned status of a send reports
    /// the calling rank as `source`.
    pub fn wait(mut self) -> Result<Status> {
        let status = match std::mem::replace(&mut self.state, State::Complete) {
            State::Complete => {
                return self.status.ok_or_else(|| {
                    self.label.failure(TransportError::Aborted(
                        "request completed without a status".into(),
                    ))
                })
            }
            State::Send { pending, status } => pending.wait().map(|_| status),
            State::Receive { pending, sink } => {
                pending.wait().and_then(|outcome| finish(sink, outcome))
            }
        }
        .map_err(|e| self.label.failure(e))?;
        self.status = Some(status);
        Ok(status)
    }

    /// Test if this operation has completed without blocking.
    ///
    /// Returns `true` once the operation is complete; the status is then
    /// available through [`status`](Self::status). Calling `test` again after
    /// completion keeps returning `true`.
    pub fn test(&mut self) -> Result<bool> {
        let label = &self.label;
        let polled = match &mut self.state {
            State::Complete => return Ok(true),
            State::Send { pending, .. } | State::Receive { pending, .. } => {
                pending.poll().map_err(|e| label.failure(e))?
            }
        };
        let Some(outcome) = polled else {
            return Ok(false);
        };
        let status = match std::mem::replace(&mut self.state, State::Complete) {
            State::Send { status, .. } => Ok(status),
            State::Receive { sink, .. } => finish(sink, outcome),
            State::Complete => Err(TransportError::Aborted("request already completed".into())),
        }
        .map_err(|e| self.label.failure(e))?;
        self.status = Some(status);
        Ok(true)
    }

    /// Wait for all requests in a collection to complete.
    ///
    /// Every request is driven to completion even if an earlier one fails;
    /// the first failure is returned.
    pub fn wait_all(requests: Vec<Request<'a>>) -> Result<Vec<Status>> {
        let mut statuses = Vec::with_capacity(requests.len());
        let mut first_error = None;
        for request in requests {
            match request.wait() {
                Ok(status) => statuses.push(status),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(statuses),
        }
    }
}

impl std::fmt::Debug for Request<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("operation", &self.label.operation)
            .field("completed", &self.is_completed())
            .field("status", &self.status)
            .finish()
    }
}

fn finish(sink: Sink<'_>, outcome: Outcome) -> TransportResult<Status> {
    match outcome {
        Outcome::Received(message) => sink(message),
        Outcome::Sent => Err(TransportError::Aborted(
            "receive completed without a message".into(),
        )),
    }
}

impl Drop for Request<'_> {
    fn drop(&mut self) {
        let status = match std::mem::replace(&mut self.state, State::Complete) {
            State::Complete => return,
            State::Send { pending, .. } => pending.wait().map(|_| ()),
            State::Receive { pending, sink } => pending
                .wait()
                .and_then(|outcome| finish(sink, outcome))
                .map(|_| ()),
        };
        if let Err(e) = status {
            log::warn!(
                "{} failed while completing dropped request: {}",
                self.label.operation,
                e
            );
        }
    }
}

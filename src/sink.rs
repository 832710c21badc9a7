//! receiving side of a generate request: the chunk/terminal callbacks and
//! the accumulated view the ui renders from.

use crate::client::{CancelHandle, GenerateError};
use bevy::prelude::Component;

/// how a request ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed(String),
    /// stopped on purpose; not an error to show the user.
    Cancelled,
}

impl<T> From<Result<T, GenerateError>> for Outcome {
    fn from(res: Result<T, GenerateError>) -> Self {
        match res {
            Ok(_) => Outcome::Completed,
            Err(GenerateError::Cancelled) => Outcome::Cancelled,
            Err(err) => Outcome::Failed(err.to_string()),
        }
    }
}

/// callbacks a generate request reports into.
pub trait ResponseSink {
    fn on_chunk(&mut self, text: &str);
    fn on_terminal(&mut self, outcome: Outcome);
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RequestState {
    #[default]
    Idle,
    Sending,
    Succeeded,
    Failed,
    Cancelled,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Success,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    pub kind: StatusKind,
    pub message: String,
}

impl Status {
    fn new(kind: StatusKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

pub const STATUS_SENDING: &str = "Sending request...";
pub const STATUS_COMPLETED: &str = "Request completed successfully";
pub const STATUS_CANCELLED: &str = "Request cancelled";

/// the response as the ui sees it: text accumulated so far, lifecycle state
/// and a status line. only touched from the thread that owns the ui.
#[derive(Component, Clone, Debug, Default)]
pub struct ResponseView {
    text: String,
    chunks: usize,
    state: RequestState,
    status: Option<Status>,
    cancel: Option<CancelHandle>,
}

impl ResponseView {
    /// reset for a new request and raise the sending indicator.
    pub fn begin(&mut self, cancel: CancelHandle) {
        self.text.clear();
        self.chunks = 0;
        self.state = RequestState::Sending;
        self.status = Some(Status::new(StatusKind::Info, STATUS_SENDING));
        self.cancel = Some(cancel);
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn chunks(&self) -> usize {
        self.chunks
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn is_sending(&self) -> bool {
        self.state == RequestState::Sending
    }

    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    /// ask the in-flight request to stop. the view stays `Sending` until the
    /// worker reports back. returns false when nothing is in flight.
    pub fn cancel(&self) -> bool {
        match (&self.cancel, self.state) {
            (Some(handle), RequestState::Sending) => {
                handle.cancel();
                true
            }
            _ => false,
        }
    }
}

impl ResponseSink for ResponseView {
    fn on_chunk(&mut self, text: &str) {
        self.text.push_str(text);
        self.chunks += 1;
    }

    fn on_terminal(&mut self, outcome: Outcome) {
        let (state, status) = match outcome {
            Outcome::Completed => (
                RequestState::Succeeded,
                Status::new(StatusKind::Success, STATUS_COMPLETED),
            ),
            Outcome::Failed(reason) => (
                RequestState::Failed,
                Status::new(StatusKind::Error, format!("Request failed: {reason}")),
            ),
            Outcome::Cancelled => (
                RequestState::Cancelled,
                Status::new(StatusKind::Info, STATUS_CANCELLED),
            ),
        };
        self.state = state;
        self.status = Some(status);
        self.cancel = None;
    }
}

/// drive one request end to end into `sink`. the client's error, if any,
/// becomes the terminal outcome; nothing is returned to the caller.
pub fn run_request<S: ResponseSink>(
    client: &crate::client::GenerateClient,
    model: &str,
    prompt: &str,
    cancel: &CancelHandle,
    sink: &mut S,
) {
    let res = client.stream(model, prompt, cancel, |chunk| sink.on_chunk(&chunk));
    sink.on_terminal(res.into());
}

use std::fmt;

/// Stream state of an OMM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    Open,
    NonStreaming,
    /// Closed, but the consumer may try to recover the stream elsewhere
    ClosedRecover,
    Closed,
    Redirected,
}

/// Health of the data on a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataState {
    Ok,
    Suspect,
    NoChange,
}

/// Status codes surfaced by the session layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    None,
    NotFound,
    Timeout,
    NotAuthorized,
    InvalidArgument,
    UsageError,
    SourceUnknown,
    NotOpen,
    ServiceDown,
    ChannelDown,
    QosNotSupported,
    DomainNotSupported,
    Preempted,
    FailoverStarted,
    FailoverCompleted,
}

/// Stream state, data state, code and text delivered with refresh and status messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OmmState {
    pub stream: StreamState,
    pub data: DataState,
    pub code: StatusCode,
    pub text: String,
}

impl OmmState {
    pub fn new(stream: StreamState, data: DataState, code: StatusCode, text: impl Into<String>) -> Self {
        Self { stream, data, code, text: text.into() }
    }

    pub fn open_ok(text: impl Into<String>) -> Self {
        Self::new(StreamState::Open, DataState::Ok, StatusCode::None, text)
    }

    pub fn open_suspect(code: StatusCode, text: impl Into<String>) -> Self {
        Self::new(StreamState::Open, DataState::Suspect, code, text)
    }

    pub fn closed_suspect(code: StatusCode, text: impl Into<String>) -> Self {
        Self::new(StreamState::Closed, DataState::Suspect, code, text)
    }

    pub fn closed_recover_suspect(code: StatusCode, text: impl Into<String>) -> Self {
        Self::new(StreamState::ClosedRecover, DataState::Suspect, code, text)
    }

    /// No further messages will follow on the stream
    pub fn is_final(&self) -> bool {
        matches!(self.stream, StreamState::Closed | StreamState::ClosedRecover | StreamState::Redirected)
    }

    pub fn is_open_ok(&self) -> bool {
        matches!(self.stream, StreamState::Open | StreamState::NonStreaming) && self.data == DataState::Ok
    }
}

impl fmt::Display for OmmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} / {:?} / {:?} / '{}'", self.stream, self.data, self.code, self.text)
    }
}

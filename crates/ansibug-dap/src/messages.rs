use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::codec::sanitize_json_error_message;
use crate::types::{
    Breakpoint, BreakpointEventBody, ContinueArguments, EvaluateArguments, NextArguments,
    OutputEventBody, ScopesArguments, SetBreakpointsArguments, SetVariableArguments,
    StackTraceArguments, StepInArguments, StepOutArguments, VariablesArguments,
};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed DAP message: {0}")]
    Malformed(String),

    #[error("unsupported DAP message type {0:?}")]
    UnsupportedType(String),

    #[error("unsupported request command {command:?}")]
    UnsupportedCommand { seq: i64, command: String },

    #[error("invalid arguments for {command:?}: {message}")]
    InvalidArguments {
        seq: i64,
        command: String,
        message: String,
    },

    #[error("unsupported event {0:?}")]
    UnsupportedEvent(String),
}

impl DecodeError {
    /// The `(seq, command)` of the request this error belongs to, when the
    /// payload was recognisably a request and the client expects an answer.
    pub fn request(&self) -> Option<(i64, &str)> {
        match self {
            Self::UnsupportedCommand { seq, command }
            | Self::InvalidArguments { seq, command, .. } => Some((*seq, command.as_str())),
            Self::Malformed(_) | Self::UnsupportedType(_) | Self::UnsupportedEvent(_) => None,
        }
    }

    fn malformed(err: serde_json::Error) -> Self {
        Self::Malformed(sanitize_json_error_message(&err.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    seq: i64,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    arguments: Option<Value>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    body: Option<Value>,
}

/// Every message the debuggee accepts from the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Request(Request),
    Output(OutputEventBody),
}

impl ClientMessage {
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let raw: RawMessage = serde_json::from_slice(bytes).map_err(DecodeError::malformed)?;
        match raw.kind.as_str() {
            "request" => {
                let command = raw.command.ok_or_else(|| {
                    DecodeError::Malformed("request is missing `command`".to_string())
                })?;
                let command = Command::decode(raw.seq, command, raw.arguments)?;
                Ok(Self::Request(Request {
                    seq: raw.seq,
                    command,
                }))
            }
            "event" => {
                let event = raw.event.unwrap_or_default();
                if event != "output" {
                    return Err(DecodeError::UnsupportedEvent(event));
                }
                let body = object_or_empty(raw.body);
                let body = serde_json::from_value(body).map_err(DecodeError::malformed)?;
                Ok(Self::Output(body))
            }
            other => Err(DecodeError::UnsupportedType(other.to_string())),
        }
    }

    /// Sequence number of the request, or `None` for events.
    pub fn request_seq(&self) -> Option<i64> {
        match self {
            Self::Request(request) => Some(request.seq),
            Self::Output(_) => None,
        }
    }
}

fn object_or_empty(value: Option<Value>) -> Value {
    match value {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(value) => value,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub seq: i64,
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ConfigurationDone,
    Continue(ContinueArguments),
    Evaluate(EvaluateArguments),
    Next(NextArguments),
    Scopes(ScopesArguments),
    SetBreakpoints(SetBreakpointsArguments),
    SetVariable(SetVariableArguments),
    StackTrace(StackTraceArguments),
    StepIn(StepInArguments),
    StepOut(StepOutArguments),
    Threads,
    Variables(VariablesArguments),
}

impl Command {
    /// The protocol command name, as echoed back in responses.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConfigurationDone => "configurationDone",
            Self::Continue(_) => "continue",
            Self::Evaluate(_) => "evaluate",
            Self::Next(_) => "next",
            Self::Scopes(_) => "scopes",
            Self::SetBreakpoints(_) => "setBreakpoints",
            Self::SetVariable(_) => "setVariable",
            Self::StackTrace(_) => "stackTrace",
            Self::StepIn(_) => "stepIn",
            Self::StepOut(_) => "stepOut",
            Self::Threads => "threads",
            Self::Variables(_) => "variables",
        }
    }

    fn decode(seq: i64, command: String, arguments: Option<Value>) -> Result<Self, DecodeError> {
        fn args<T: DeserializeOwned>(
            seq: i64,
            command: &str,
            arguments: Option<Value>,
        ) -> Result<T, DecodeError> {
            serde_json::from_value(object_or_empty(arguments)).map_err(|err| {
                DecodeError::InvalidArguments {
                    seq,
                    command: command.to_string(),
                    message: sanitize_json_error_message(&err.to_string()),
                }
            })
        }

        let decoded = match command.as_str() {
            "configurationDone" => Self::ConfigurationDone,
            "continue" => Self::Continue(args(seq, &command, arguments)?),
            "evaluate" => Self::Evaluate(args(seq, &command, arguments)?),
            "next" => Self::Next(args(seq, &command, arguments)?),
            "scopes" => Self::Scopes(args(seq, &command, arguments)?),
            "setBreakpoints" => Self::SetBreakpoints(args(seq, &command, arguments)?),
            "setVariable" => Self::SetVariable(args(seq, &command, arguments)?),
            "stackTrace" => Self::StackTrace(args(seq, &command, arguments)?),
            "stepIn" => Self::StepIn(args(seq, &command, arguments)?),
            "stepOut" => Self::StepOut(args(seq, &command, arguments)?),
            "threads" => Self::Threads,
            "variables" => Self::Variables(args(seq, &command, arguments)?),
            _ => return Err(DecodeError::UnsupportedCommand { seq, command }),
        };
        Ok(decoded)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub seq: i64,
    #[serde(rename = "type")]
    pub type_: &'static str,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Response {
    /// `seq` is stamped by the writer when the response is transmitted.
    pub fn success(request_seq: i64, command: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            seq: 0,
            type_: "response",
            request_seq,
            success: true,
            command: command.into(),
            message: None,
            body,
        }
    }

    pub fn with_body<T: Serialize>(
        request_seq: i64,
        command: impl Into<String>,
        body: &T,
    ) -> serde_json::Result<Self> {
        Ok(Self::success(request_seq, command, Some(serde_json::to_value(body)?)))
    }

    pub fn error(request_seq: i64, command: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            seq: 0,
            type_: "response",
            request_seq,
            success: false,
            command: command.into(),
            message: Some(message.into()),
            body: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub seq: i64,
    #[serde(rename = "type")]
    pub type_: &'static str,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Event {
    pub fn new(event: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            seq: 0,
            type_: "event",
            event: event.into(),
            body,
        }
    }

    pub fn with_body<T: Serialize>(event: impl Into<String>, body: &T) -> serde_json::Result<Self> {
        Ok(Self::new(event, Some(serde_json::to_value(body)?)))
    }

    pub fn breakpoint_changed(breakpoint: Breakpoint) -> serde_json::Result<Self> {
        Self::with_body(
            "breakpoint",
            &BreakpointEventBody {
                reason: "changed".to_string(),
                breakpoint,
            },
        )
    }
}

/// Anything the debuggee sends to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Response(Response),
    Event(Event),
}

impl ServerMessage {
    pub fn set_seq(&mut self, seq: i64) {
        match self {
            Self::Response(response) => response.seq = seq,
            Self::Event(event) => event.seq = seq,
        }
    }

    /// Command or event name, for logging.
    pub fn name(&self) -> &str {
        match self {
            Self::Response(response) => &response.command,
            Self::Event(event) => &event.event,
        }
    }
}

impl From<Response> for ServerMessage {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

impl From<Event> for ServerMessage {
    fn from(event: Event) -> Self {
        Self::Event(event)
    }
}

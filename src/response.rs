//! Response envelope: mutated by handler code, flushed once into the transport's sink.

use crate::error::{ApiError, ResponseError};
use axum::http::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt::Display;
use tokio::sync::oneshot;

/// What the transport writes to the wire: status line plus JSON body.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpReply {
    pub status: StatusCode,
    pub body: Value,
}

/// Writable end of an in-flight request. The transport keeps the receiving half.
#[derive(Debug)]
pub struct ResponseSink(oneshot::Sender<HttpReply>);

impl ResponseSink {
    pub fn channel() -> (ResponseSink, oneshot::Receiver<HttpReply>) {
        let (tx, rx) = oneshot::channel();
        (ResponseSink(tx), rx)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeBody<'a> {
    status_code: u16,
    error: bool,
    status_message: &'a str,
    data: &'a Value,
    meta: &'a Map<String, Value>,
}

#[derive(Debug)]
pub struct ResponseEnvelope {
    status_code: u16,
    error: bool,
    status_message: String,
    data: Value,
    meta: Map<String, Value>,
    sink: Option<ResponseSink>,
}

impl Default for ResponseEnvelope {
    fn default() -> Self {
        ResponseEnvelope {
            status_code: 200,
            error: false,
            status_message: String::new(),
            data: Value::Object(Map::new()),
            meta: Map::new(),
            sink: None,
        }
    }
}

impl ResponseEnvelope {
    /// Envelope without a sink; `send` fails until one is bound.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bound(sink: ResponseSink) -> Self {
        ResponseEnvelope {
            sink: Some(sink),
            ..Self::default()
        }
    }

    pub fn bind(&mut self, sink: ResponseSink) -> &mut Self {
        self.sink = Some(sink);
        self
    }

    pub fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self
    }

    pub fn data(&mut self, data: Value) -> &mut Self {
        self.data = data;
        self
    }

    pub fn meta(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.meta.insert(key.into(), value);
        self
    }

    pub fn status_message(&mut self, message: impl Into<String>) -> &mut Self {
        self.status_message = message.into();
        self
    }

    /// Marks the payload as failed and records the message.
    pub fn error_message(&mut self, message: impl Display) -> &mut Self {
        self.error = true;
        self.status_message = message.to_string();
        self
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    /// JSON body for the accumulated state.
    pub fn body(&self) -> Value {
        let body = EnvelopeBody {
            status_code: self.status_code,
            error: self.error,
            status_message: &self.status_message,
            data: &self.data,
            meta: &self.meta,
        };
        serde_json::to_value(body).unwrap_or(Value::Null)
    }

    /// Flushes the envelope. Consumes it, so a request is answered at most once.
    pub fn send(mut self) -> Result<(), ResponseError> {
        let sink = self.sink.take().ok_or(ResponseError::MissingSink)?;
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let reply = HttpReply {
            status,
            body: self.body(),
        };
        if sink.0.send(reply).is_err() {
            tracing::debug!(status = %status, "client went away before the response was flushed");
        }
        Ok(())
    }

    pub fn handle_error(mut self, code: u16, message: impl Display) -> Result<(), ResponseError> {
        self.set_code(code).error_message(message);
        self.send()
    }

    /// `handle_error` for a typed error: server-side details are logged, the caller gets the public message.
    pub fn fail(self, err: &ApiError) -> Result<(), ResponseError> {
        let status = err.status();
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        self.handle_error(status.as_u16(), err.public_message())
    }
}

/// Envelope-shaped error body for responses produced outside a handler.
pub fn error_body(code: u16, message: String) -> Value {
    serde_json::json!({
        "statusCode": code,
        "error": true,
        "statusMessage": message,
        "data": {},
        "meta": {}
    })
}

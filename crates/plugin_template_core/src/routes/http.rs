//! Host-agnostic request/response values exchanged with route handlers.

use crate::extension::access::Principal;
use serde::Serialize;
use serde_json::{json, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// HTTP methods a route may accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Parses an upper-case method token.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "PATCH" => Some(Self::Patch),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl Display for HttpMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request as handed over by the host adapter.
///
/// `path` is the full request path, already percent-decoded, without query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionRequest {
    pub method: HttpMethod,
    pub path: String,
    pub body: Vec<u8>,
    /// Caller identity resolved by the host's authentication layer.
    pub principal: Option<Principal>,
}

impl ExtensionRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: Vec::new(),
            principal: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_json(self, value: &Value) -> Self {
        self.with_body(value.to_string())
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Parses the body as JSON.
    pub fn json_body(&self) -> Result<Value, RequestFault> {
        serde_json::from_slice(&self.body).map_err(|err| {
            RequestFault::BadRequest(format!("request body is not valid JSON: {err}"))
        })
    }
}

/// Response returned to the host adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl ExtensionResponse {
    pub fn json(status: u16, value: &Value) -> Self {
        Self {
            status,
            content_type: "application/json".to_string(),
            body: value.to_string().into_bytes(),
        }
    }

    pub fn bytes(status: u16, content_type: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type: content_type.into(),
            body,
        }
    }

    /// `{"success": false, "error": <message>}` with `status`.
    pub fn failure(status: u16, message: &str) -> Self {
        Self::json(status, &json!({ "success": false, "error": message }))
    }

    /// Parses the body back as JSON, mainly for hosts and tests.
    pub fn json_body(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// Failure raised inside a route handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestFault {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl RequestFault {
    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::BadRequest(_) => 400,
            Self::Internal(_) => 500,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(message) | Self::BadRequest(message) | Self::Internal(message) => {
                message
            }
        }
    }

    pub fn into_response(self) -> ExtensionResponse {
        ExtensionResponse::failure(self.status(), self.message())
    }
}

impl Display for RequestFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message(), self.status())
    }
}

impl Error for RequestFault {}

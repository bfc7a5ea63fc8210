//! Extension route table.
//!
//! # Responsibility
//! - Hold the endpoints one extension contributes under its private prefix.
//! - Enforce role requirements through the host before any handler runs.
//! - Convert handler faults and panics into structured JSON failures.
//!
//! # Invariants
//! - Tables are built once, before activation, and never change afterwards.
//! - A request outside the table's prefix is never handed to a handler.
//! - No handler outcome unwinds past `dispatch`.

mod http;

pub use http::{ExtensionRequest, ExtensionResponse, HttpMethod, RequestFault};

use crate::extension::access::{AccessControl, AccessDecision, RoleRequirement};
use crate::host::LogSink;
use crate::logging::panic_message;
use log::Level;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Handler bound to one route and method.
pub type RouteHandler<S> =
    fn(&S, &ExtensionRequest, &RouteParams) -> Result<ExtensionResponse, RequestFault>;

/// Introspection record for one registered path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteEntry {
    /// Path relative to the table prefix, e.g. `/assets/<file>`.
    pub path: String,
    pub methods: BTreeSet<HttpMethod>,
    pub access: Option<RoleRequirement>,
}

/// Values captured from `<name>` path segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteParams {
    values: BTreeMap<String, String>,
}

impl RouteParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// Captures the remainder of the path, slashes included.
    Tail(String),
}

struct Route<S> {
    entry: RouteEntry,
    segments: Vec<Segment>,
    handlers: BTreeMap<HttpMethod, RouteHandler<S>>,
}

/// Endpoints of one extension, mounted under `prefix`.
pub struct RouteTable<S> {
    prefix: String,
    routes: Vec<Route<S>>,
}

impl<S> RouteTable<S> {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches('/').to_string(),
            routes: Vec::new(),
        }
    }

    /// Registers `handler` for `method` on `path`.
    ///
    /// Registering a second method on an existing path is allowed when both
    /// declarations carry the same role requirement.
    pub fn route(
        mut self,
        method: HttpMethod,
        path: &str,
        access: Option<RoleRequirement>,
        handler: RouteHandler<S>,
    ) -> Result<Self, RouteError> {
        let segments = parse_pattern(path)?;

        if let Some(existing) = self.routes.iter_mut().find(|route| route.segments == segments) {
            if existing.entry.access != access {
                return Err(RouteError::ConflictingAccess(path.to_string()));
            }
            if existing.handlers.insert(method, handler).is_some() {
                return Err(RouteError::DuplicateRoute {
                    method,
                    path: path.to_string(),
                });
            }
            existing.entry.methods.insert(method);
            return Ok(self);
        }

        let mut handlers = BTreeMap::new();
        handlers.insert(method, handler);
        self.routes.push(Route {
            entry: RouteEntry {
                path: path.to_string(),
                methods: BTreeSet::from([method]),
                access,
            },
            segments,
            handlers,
        });
        Ok(self)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Declared routes in registration order.
    pub fn entries(&self) -> Vec<RouteEntry> {
        self.routes.iter().map(|route| route.entry.clone()).collect()
    }

    /// Returns whether `path` falls under this table's prefix.
    pub fn owns(&self, path: &str) -> bool {
        self.local_path(path).is_some()
    }

    /// Routes one request.
    ///
    /// Unknown paths give 404, a known path with another method 405, a
    /// failed role check 401/403. Handler faults and panics are logged
    /// through `sink` and returned as JSON failures.
    pub fn dispatch(
        &self,
        state: &S,
        access: &dyn AccessControl,
        sink: &dyn LogSink,
        request: &ExtensionRequest,
    ) -> ExtensionResponse {
        let Some(local) = self.local_path(&request.path) else {
            return ExtensionResponse::failure(404, "Not found");
        };
        let Some((route, params)) = self
            .routes
            .iter()
            .find_map(|route| match_segments(&route.segments, local).map(|params| (route, params)))
        else {
            return ExtensionResponse::failure(404, "Not found");
        };
        let Some(handler) = route.handlers.get(&request.method) else {
            return ExtensionResponse::failure(405, "Method not allowed");
        };

        if let Some(requirement) = route.entry.access {
            match access.evaluate(request, requirement) {
                AccessDecision::Granted => {}
                AccessDecision::Unauthenticated => {
                    return ExtensionResponse::failure(401, "Authentication required")
                }
                AccessDecision::Forbidden => return ExtensionResponse::failure(403, "Forbidden"),
            }
        }

        match catch_unwind(AssertUnwindSafe(|| handler(state, request, &params))) {
            Ok(Ok(response)) => response,
            Ok(Err(fault)) => {
                let level = if fault.status() >= 500 {
                    Level::Error
                } else {
                    Level::Warn
                };
                sink.log(
                    level,
                    &format!(
                        "event=request module=routes status=error method={} path={} code={} error={}",
                        request.method,
                        request.path,
                        fault.status(),
                        fault.message()
                    ),
                );
                fault.into_response()
            }
            Err(payload) => {
                sink.log(
                    Level::Error,
                    &format!(
                        "event=request module=routes status=panic method={} path={} payload={}",
                        request.method,
                        request.path,
                        panic_message(payload.as_ref())
                    ),
                );
                ExtensionResponse::failure(500, "Internal server error")
            }
        }
    }

    fn local_path<'a>(&self, path: &'a str) -> Option<&'a str> {
        let path = path.split('?').next().unwrap_or_default();
        let rest = path.strip_prefix(self.prefix.as_str())?;
        if rest.is_empty() {
            return Some("/");
        }
        rest.starts_with('/').then_some(rest)
    }
}

fn parse_pattern(path: &str) -> Result<Vec<Segment>, RouteError> {
    let Some(rest) = path.strip_prefix('/') else {
        return Err(RouteError::InvalidPath(path.to_string()));
    };

    let mut segments = Vec::new();
    for raw in rest.split('/').filter(|raw| !raw.is_empty()) {
        if matches!(segments.last(), Some(Segment::Tail(_))) {
            return Err(RouteError::InvalidPath(path.to_string()));
        }
        let segment = match raw.strip_prefix('<').and_then(|inner| inner.strip_suffix('>')) {
            Some(name) if !name.is_empty() => Segment::Tail(name.to_string()),
            Some(_) => return Err(RouteError::InvalidPath(path.to_string())),
            None if raw.contains(['<', '>']) => {
                return Err(RouteError::InvalidPath(path.to_string()))
            }
            None => Segment::Literal(raw.to_string()),
        };
        segments.push(segment);
    }
    Ok(segments)
}

fn match_segments(segments: &[Segment], local: &str) -> Option<RouteParams> {
    let mut rest = local.strip_prefix('/')?;
    let mut params = RouteParams::default();

    for segment in segments {
        match segment {
            Segment::Literal(literal) => {
                let after = rest.strip_prefix(literal.as_str())?;
                rest = if after.is_empty() {
                    after
                } else {
                    after.strip_prefix('/')?
                };
            }
            Segment::Tail(name) => {
                if rest.is_empty() {
                    return None;
                }
                params.values.insert(name.clone(), rest.to_string());
                rest = "";
            }
        }
    }
    rest.is_empty().then_some(params)
}

/// Route registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    InvalidPath(String),
    DuplicateRoute { method: HttpMethod, path: String },
    ConflictingAccess(String),
}

impl Display for RouteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPath(path) => write!(f, "route path is invalid: {path}"),
            Self::DuplicateRoute { method, path } => {
                write!(f, "route registered twice: {method} {path}")
            }
            Self::ConflictingAccess(path) => {
                write!(f, "route declares conflicting role requirements: {path}")
            }
        }
    }
}

impl Error for RouteError {}

//! Owned snapshots of request / response heads handed to role providers and auditors.
use bytes::Bytes;
use hyper::{HeaderMap, Method, Request, Response, StatusCode, Uri, Version};
use serde::{Serialize, Serializer, ser::SerializeMap};

/// A request as seen by a roles provider or an auditor.
///
/// `body` is only populated for the outgoing request of an audited exchange,
/// where the body is buffered once so the audit copy and the forwarded copy are
/// independent.
#[derive(Debug, Clone, Serialize)]
pub struct RequestSnapshot {
    #[serde(serialize_with = "serialize_method")]
    pub method: Method,
    #[serde(serialize_with = "serialize_display")]
    pub uri: Uri,
    #[serde(serialize_with = "serialize_version")]
    pub version: Version,
    #[serde(serialize_with = "serialize_headers")]
    pub headers: HeaderMap,
    #[serde(skip)]
    pub body: Option<Bytes>,
}

impl RequestSnapshot {
    /// Snapshot the head of `req`, without its body.
    pub fn of<B>(req: &Request<B>) -> Self {
        Self {
            method: req.method().clone(),
            uri: req.uri().clone(),
            version: req.version(),
            headers: req.headers().clone(),
            body: None,
        }
    }

    /// Snapshot from request parts plus an already buffered body.
    pub fn from_parts(parts: &http::request::Parts, body: Option<Bytes>) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            version: parts.version,
            headers: parts.headers.clone(),
            body,
        }
    }

    /// The URL pathname, as matched by route patterns.
    pub fn path(&self) -> &str {
        self.uri.path()
    }
}

/// Head of a target response, taken before the caller reads the body.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseSnapshot {
    #[serde(serialize_with = "serialize_status")]
    pub status: StatusCode,
    #[serde(serialize_with = "serialize_version")]
    pub version: Version,
    #[serde(serialize_with = "serialize_headers")]
    pub headers: HeaderMap,
}

impl ResponseSnapshot {
    pub fn of<B>(res: &Response<B>) -> Self {
        Self {
            status: res.status(),
            version: res.version(),
            headers: res.headers().clone(),
        }
    }
}

fn serialize_method<S: Serializer>(method: &Method, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(method.as_str())
}

fn serialize_display<S: Serializer>(value: &Uri, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(value)
}

fn serialize_version<S: Serializer>(version: &Version, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&format_args!("{version:?}"))
}

fn serialize_status<S: Serializer>(status: &StatusCode, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u16(status.as_u16())
}

fn serialize_headers<S: Serializer>(headers: &HeaderMap, s: S) -> Result<S::Ok, S::Error> {
    let mut map = s.serialize_map(Some(headers.keys_len()))?;
    for name in headers.keys() {
        let values: Vec<&str> = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        map.serialize_entry(name.as_str(), &values.join(", "))?;
    }
    map.end()
}

//! CORS headers and `OPTIONS` short-circuit.
//!
//! | Option | Default | Effect |
//! |---|---|---|
//! | `cors` | `false` | Sets `Access-Control-Allow-Origin` for allowed origins |
//! | `origins` | `["*"]` | Allowed origins; `*` allows any |
//! | `methods` | `GET HEAD PUT PATCH POST DELETE` | `Access-Control-Allow-Methods` on `OPTIONS` |
//! | `status` | `204` | Status of the `OPTIONS` reply |
//! | `headers` | echo the request | `Access-Control-Allow-Headers` on `OPTIONS` |
//!
//! `origins`, `methods` and `headers` accept either a list or a single string.
//! An `OPTIONS` request never reaches the route dispatcher.

use async_trait::async_trait;
use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_REQUEST_HEADERS, CONTENT_LENGTH, ORIGIN,
};
use http::{HeaderValue, StatusCode};
use serde::{Deserialize, Deserializer};
use tracing::debug;

use super::{Flow, Middleware};
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

const ANY_ORIGIN: &str = "*";

/// Preflight options.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PreflightConfig {
    pub cors: bool,
    #[serde(deserialize_with = "one_or_many")]
    pub origins: Vec<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub methods: Vec<String>,
    pub status: u16,
    #[serde(deserialize_with = "optional_one_or_many")]
    pub headers: Option<Vec<String>>,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            cors: false,
            origins: vec![ANY_ORIGIN.to_owned()],
            methods: ["GET", "HEAD", "PUT", "PATCH", "POST", "DELETE"]
                .into_iter()
                .map(String::from)
                .collect(),
            status: 204,
            headers: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for Vec<String> {
    fn from(v: OneOrMany) -> Self {
        match v {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    OneOrMany::deserialize(d).map(Into::into)
}

fn optional_one_or_many<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<String>>, D::Error> {
    Option::<OneOrMany>::deserialize(d).map(|v| v.map(Into::into))
}

/// Where `Access-Control-Allow-Headers` comes from.
#[derive(Clone, Debug)]
enum AllowHeaders {
    /// Echo the request's `Access-Control-Request-Headers`.
    Echo,
    /// A configured list. `None` when it joined to an empty string.
    Fixed(Option<HeaderValue>),
}

/// The preflight fitting.
#[derive(Clone, Debug)]
pub struct Preflight {
    cors: bool,
    origins: Vec<String>,
    allow_methods: HeaderValue,
    allow_headers: AllowHeaders,
    status: StatusCode,
}

impl Preflight {
    /// Validates `config` and pre-renders the header values.
    pub fn new(config: PreflightConfig) -> Result<Self, Error> {
        let status = StatusCode::from_u16(config.status)
            .map_err(|_| Error::Config(format!("preflight status {} is not a valid status code", config.status)))?;

        let methods = config
            .methods
            .iter()
            .map(|m| m.to_ascii_uppercase())
            .collect::<Vec<_>>()
            .join(",");
        let allow_methods = header_value("methods", &methods)?;

        let allow_headers = match &config.headers {
            None => AllowHeaders::Echo,
            Some(list) if list.iter().all(String::is_empty) => AllowHeaders::Fixed(None),
            Some(list) => AllowHeaders::Fixed(Some(header_value("headers", &list.join(","))?)),
        };

        Ok(Self {
            cors: config.cors,
            origins: config.origins,
            allow_methods,
            allow_headers,
            status,
        })
    }

    fn allows(&self, origin: &str) -> bool {
        self.origins.iter().any(|o| o == ANY_ORIGIN || o == origin)
    }
}

fn header_value(option: &str, value: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(value)
        .map_err(|_| Error::Config(format!("preflight {option} `{value}` is not a valid header value")))
}

#[async_trait]
impl Middleware for Preflight {
    fn name(&self) -> &str {
        "preflight"
    }

    async fn handle(&self, req: &mut Request, res: &mut Response) -> Result<Flow, Error> {
        if self.cors {
            let origin = req
                .headers()
                .get(ORIGIN)
                .cloned()
                .unwrap_or_else(|| HeaderValue::from_static(ANY_ORIGIN));
            if self.allows(origin.to_str().unwrap_or_default()) {
                res.set_header(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
            }
        }

        if !req.method().as_str().eq_ignore_ascii_case("OPTIONS") {
            return Ok(Flow::Next);
        }

        let allow_headers = match &self.allow_headers {
            AllowHeaders::Echo => req
                .headers()
                .get(ACCESS_CONTROL_REQUEST_HEADERS)
                .filter(|v| !v.is_empty())
                .cloned(),
            AllowHeaders::Fixed(value) => value.clone(),
        };
        if let Some(value) = allow_headers {
            res.set_header(ACCESS_CONTROL_ALLOW_HEADERS, value);
        }
        res.set_header(ACCESS_CONTROL_ALLOW_METHODS, self.allow_methods.clone());
        res.set_header(CONTENT_LENGTH, HeaderValue::from_static("0"));
        res.set_status(self.status);
        res.end()
            .map_err(|e| Error::middleware(self.name(), e.to_string()))?;

        debug!(path = req.path(), status = self.status.as_u16(), "preflight answered");
        Ok(Flow::Halt)
    }
}

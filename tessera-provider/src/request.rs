//! Building concrete requests from a manifest and resolved parameters.

use crate::call::CallSpec;
use crate::manifest::{AuthScheme, ProviderManifest};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tessera_core::value::display;
use tessera_core::{EngineError, ProviderId};

const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

/// HTTP method of a provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// `GET`
    #[default]
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `DELETE`
    Delete,
}

impl Method {
    /// The method name as sent on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            other => Err(EngineError::InvalidParameters(format!(
                "unsupported method '{other}'"
            ))),
        }
    }
}

/// A fully-resolved outbound request.
#[derive(Clone, PartialEq)]
pub struct ApiRequest {
    /// Provider the request targets.
    pub provider: ProviderId,
    /// HTTP method.
    pub method: Method,
    /// Base address plus the filled endpoint path, without the query string.
    pub url: String,
    /// Query parameters, in declaration order.
    pub query: Vec<(String, String)>,
    /// Extra headers, auth included.
    pub headers: Vec<(String, String)>,
    /// JSON body for non-GET requests.
    pub body: Option<Value>,
    /// Bound on the whole call.
    pub timeout: Duration,
}

// Headers may carry credentials.
impl fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<&str> = self.headers.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("ApiRequest")
            .field("provider", &self.provider)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("query_keys", &self.query.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .field("headers", &header_names)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ApiRequest {
    /// Build the request for `spec` against `manifest`.
    ///
    /// `{name}` path segments are filled (percent-encoded) from the params
    /// and removed from the query; the remaining non-null params become
    /// query parameters.
    pub fn build(
        provider: &ProviderId,
        manifest: &ProviderManifest,
        spec: &CallSpec,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let path = manifest.endpoints.get(&spec.endpoint).ok_or_else(|| {
            EngineError::InvalidParameters(format!(
                "provider '{provider}' has no endpoint '{}'",
                spec.endpoint
            ))
        })?;

        let mut remaining: Map<String, Value> = spec.params.clone();
        let path = fill_path(path, &mut remaining)?;
        let url = join(&manifest.base_address, &path);

        let mut query: Vec<(String, String)> = remaining
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), display(v)))
            .collect();
        let mut headers = Vec::new();
        if let Some(auth) = &manifest.auth {
            apply_auth(auth, &mut headers, &mut query);
        }

        Ok(Self {
            provider: provider.clone(),
            method: spec.method,
            url,
            query,
            headers,
            body: spec.body.clone(),
            timeout,
        })
    }

    /// The URL with its query string, percent-encoded.
    pub fn full_url(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }
        let query = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{query}", self.url)
    }

    /// Value of a header, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn fill_path(template: &str, params: &mut Map<String, Value>) -> Result<String, EngineError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let Some(len) = rest[open..].find('}') else {
            break;
        };
        let name = &rest[open + 1..open + len];
        let value = params.remove(name).ok_or_else(|| {
            EngineError::InvalidParameters(format!("missing path parameter '{name}'"))
        })?;
        out.push_str(&rest[..open]);
        out.push_str(&urlencoding::encode(&display(&value)));
        rest = &rest[open + len + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn join(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        (false, false) if !path.is_empty() => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

fn apply_auth(auth: &AuthScheme, headers: &mut Vec<(String, String)>, query: &mut Vec<(String, String)>) {
    match auth {
        AuthScheme::ApiKey {
            key,
            query_param: Some(param),
            ..
        } => query.push((param.clone(), key.clone())),
        AuthScheme::ApiKey { key, header, .. } => headers.push((
            header.clone().unwrap_or_else(|| DEFAULT_API_KEY_HEADER.to_string()),
            key.clone(),
        )),
        AuthScheme::Bearer { token } => {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        AuthScheme::Basic { username, password } => {
            let encoded = STANDARD.encode(format!("{username}:{password}"));
            headers.push(("Authorization".to_string(), format!("Basic {encoded}")));
        }
    }
}

//! Request parameter projection.
//!
//! Callers declare named path/query parameters at construction; the driver
//! resolves them once when it builds the initialization request. The
//! `uploadType=resumable` marker and the API key are appended by the driver
//! itself and never go through a binding.

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

/// Where a parameter lands on the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLocation {
    /// Substituted into a `{name}` placeholder in the path.
    Path,
    /// Appended to the query string.
    Query,
}

#[derive(Debug, Clone)]
struct ParamBinding {
    name: String,
    location: ParamLocation,
    value: Option<String>,
}

/// Declared parameter bindings for one upload.
///
/// Bindings with a `None` value are declared-but-unset and are skipped at
/// resolution time, so optional parameters can be registered
/// unconditionally.
#[derive(Debug, Clone, Default)]
pub struct RequestParams {
    bindings: Vec<ParamBinding>,
}

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a path parameter substituted into `{name}`.
    pub fn path(self, name: impl Into<String>, value: impl ToString) -> Self {
        self.bind(name, ParamLocation::Path, Some(value.to_string()))
    }

    /// Declares an optional path parameter.
    pub fn path_opt(self, name: impl Into<String>, value: Option<impl ToString>) -> Self {
        self.bind(name, ParamLocation::Path, value.map(|v| v.to_string()))
    }

    /// Declares a query parameter.
    pub fn query(self, name: impl Into<String>, value: impl ToString) -> Self {
        self.bind(name, ParamLocation::Query, Some(value.to_string()))
    }

    /// Declares an optional query parameter.
    pub fn query_opt(self, name: impl Into<String>, value: Option<impl ToString>) -> Self {
        self.bind(name, ParamLocation::Query, value.map(|v| v.to_string()))
    }

    fn bind(mut self, name: impl Into<String>, location: ParamLocation, value: Option<String>) -> Self {
        self.bindings.push(ParamBinding {
            name: name.into(),
            location,
            value,
        });
        self
    }

    /// Resolves the bindings against a path template.
    ///
    /// Returns the substituted path and the query pairs to append.
    pub fn resolve(&self, path_template: &str) -> (String, Vec<(String, String)>) {
        let mut path = path_template.to_string();
        let mut query = Vec::new();

        for binding in &self.bindings {
            let Some(value) = &binding.value else {
                continue;
            };
            match binding.location {
                ParamLocation::Path => {
                    let placeholder = format!("{{{}}}", binding.name);
                    let encoded = utf8_percent_encode(value, NON_ALPHANUMERIC).to_string();
                    path = path.replace(&placeholder, &encoded);
                }
                ParamLocation::Query => {
                    query.push((binding.name.clone(), value.clone()));
                }
            }
        }

        (path, query)
    }
}

/// Encodes query pairs into a `k=v&k=v` string.
pub(crate) fn encode_query(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                utf8_percent_encode(k, NON_ALPHANUMERIC),
                utf8_percent_encode(v, NON_ALPHANUMERIC)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

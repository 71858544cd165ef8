// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request values read from path and query parameters.

use axum::RequestPartsExt;
use axum::extract::RawPathParams;
use axum::http::request::Parts;
use wayfarer_core::identity::RequestValues;

/// Named values carried by a request.
///
/// Path parameters come first, then query parameters; lookups return the
/// first occurrence of a name. Request bodies are not read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParameters {
    values: Vec<(String, String)>,
}

impl RequestParameters {
    /// Collect path and query parameters from request parts.
    pub async fn from_parts(parts: &mut Parts) -> Self {
        let mut values = Vec::new();

        if let Ok(path) = parts.extract::<RawPathParams>().await {
            values.extend(path.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        }

        if let Some(query) = parts.uri.query() {
            values.extend(
                url::form_urlencoded::parse(query.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned())),
            );
        }

        Self { values }
    }

    /// Build from explicit pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// All collected pairs, in request order.
    pub fn pairs(&self) -> &[(String, String)] {
        &self.values
    }
}

impl RequestValues for RequestParameters {
    fn value(&self, name: &str) -> Option<&str> {
        self.get(name)
    }
}

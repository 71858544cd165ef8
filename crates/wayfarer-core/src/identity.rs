// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance identity: derivation from request values and canonical encoding.
//!
//! An identity is the journey name, the ordered request key values named by the
//! descriptor, and an optional server-generated unique key. The canonical
//! string form is
//!
//! ```text
//! <name>[?<key>=<value>(&<key>=<value>)*][#<unique-key>]
//! ```
//!
//! with every component percent-encoded, so `?`, `&`, `=`, `#` and `%` inside
//! names or values never clash with the delimiters.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::descriptor::JourneyDescriptor;
use crate::error::{JourneyError, Result};

/// Source of named request values (path segments, query string, form fields).
pub trait RequestValues {
    /// The value named `name`, if the request carries one.
    fn value(&self, name: &str) -> Option<&str>;
}

impl<T: RequestValues + ?Sized> RequestValues for &T {
    fn value(&self, name: &str) -> Option<&str> {
        (**self).value(name)
    }
}

impl RequestValues for HashMap<String, String> {
    fn value(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

impl RequestValues for BTreeMap<String, String> {
    fn value(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

impl<K: AsRef<str>, V: AsRef<str>> RequestValues for [(K, V)] {
    fn value(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_ref())
    }
}

impl<K: AsRef<str>, V: AsRef<str>> RequestValues for Vec<(K, V)> {
    fn value(&self, name: &str) -> Option<&str> {
        self.as_slice().value(name)
    }
}

/// Identity of one journey instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JourneyInstanceId {
    journey_name: String,
    keys: Vec<(String, String)>,
    unique_key: Option<String>,
}

impl JourneyInstanceId {
    /// Build an identity from its parts.
    pub fn new(
        journey_name: impl Into<String>,
        keys: Vec<(String, String)>,
        unique_key: Option<String>,
    ) -> Self {
        Self {
            journey_name: journey_name.into(),
            keys,
            unique_key,
        }
    }

    /// Resolve an identity from request values.
    ///
    /// Returns `None` when a request key is missing or empty, or when the
    /// descriptor requires a unique key and the request carries none.
    pub fn try_resolve<V: RequestValues + ?Sized>(
        descriptor: &JourneyDescriptor,
        unique_key_param: &str,
        values: &V,
    ) -> Option<Self> {
        let keys = Self::collect_keys(descriptor, values)?;

        let unique_key = if descriptor.unique_key_required() {
            match values.value(unique_key_param) {
                Some(uk) if !uk.is_empty() => Some(uk.to_string()),
                _ => return None,
            }
        } else {
            None
        };

        Some(Self {
            journey_name: descriptor.name().to_string(),
            keys,
            unique_key,
        })
    }

    /// Derive the identity for a new instance.
    ///
    /// When the descriptor requires a unique key a fresh random one is always
    /// generated; any unique key present in `values` is ignored.
    pub fn create<V: RequestValues + ?Sized>(
        descriptor: &JourneyDescriptor,
        values: &V,
    ) -> Result<Self> {
        let keys = Self::collect_keys(descriptor, values).ok_or_else(|| {
            JourneyError::IdentityNotResolvable {
                journey: descriptor.name().to_string(),
            }
        })?;

        let unique_key = descriptor
            .unique_key_required()
            .then(Self::generate_unique_key);

        Ok(Self {
            journey_name: descriptor.name().to_string(),
            keys,
            unique_key,
        })
    }

    fn collect_keys<V: RequestValues + ?Sized>(
        descriptor: &JourneyDescriptor,
        values: &V,
    ) -> Option<Vec<(String, String)>> {
        descriptor
            .keys()
            .iter()
            .map(|name| match values.value(name) {
                Some(value) if !value.is_empty() => Some((name.clone(), value.to_string())),
                _ => None,
            })
            .collect()
    }

    /// A new unguessable unique key (122 random bits from the OS CSPRNG).
    fn generate_unique_key() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Journey name.
    pub fn journey_name(&self) -> &str {
        &self.journey_name
    }

    /// Ordered request key values.
    pub fn keys(&self) -> &[(String, String)] {
        &self.keys
    }

    /// The value of one request key.
    pub fn key(&self, name: &str) -> Option<&str> {
        self.keys.value(name)
    }

    /// The unique key, when the journey uses one.
    pub fn unique_key(&self) -> Option<&str> {
        self.unique_key.as_deref()
    }

    /// Parameters a client must send to address this instance again.
    pub fn request_parameters(&self, unique_key_param: &str) -> Vec<(String, String)> {
        let mut params = self.keys.clone();
        if let Some(uk) = &self.unique_key {
            params.push((unique_key_param.to_string(), uk.clone()));
        }
        params
    }

    /// Canonical string form.
    pub fn encode(&self) -> String {
        let mut out = urlencoding::encode(&self.journey_name).into_owned();

        for (i, (name, value)) in self.keys.iter().enumerate() {
            out.push(if i == 0 { '?' } else { '&' });
            out.push_str(&urlencoding::encode(name));
            out.push('=');
            out.push_str(&urlencoding::encode(value));
        }

        if let Some(uk) = &self.unique_key {
            out.push('#');
            out.push_str(&urlencoding::encode(uk));
        }

        out
    }

    /// Parse the canonical string form.
    pub fn decode(encoded: &str) -> Result<Self> {
        let invalid = |reason: &str| JourneyError::InvalidIdentity {
            encoded: encoded.to_string(),
            reason: reason.to_string(),
        };
        let unescape = |part: &str| {
            urlencoding::decode(part)
                .map(|s| s.into_owned())
                .map_err(|_| invalid("component is not valid UTF-8 after unescaping"))
        };

        let (rest, unique_key) = match encoded.split_once('#') {
            Some((rest, uk)) if !uk.is_empty() => (rest, Some(unescape(uk)?)),
            Some(_) => return Err(invalid("empty unique key")),
            None => (encoded, None),
        };

        let (name, query) = match rest.split_once('?') {
            Some((name, query)) if !query.is_empty() => (name, Some(query)),
            Some(_) => return Err(invalid("empty key list")),
            None => (rest, None),
        };

        let journey_name = unescape(name)?;
        if journey_name.is_empty() {
            return Err(invalid("empty journey name"));
        }

        let mut keys = Vec::new();
        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            let (k, v) = pair
                .split_once('=')
                .ok_or_else(|| invalid("key without value"))?;
            let (k, v) = (unescape(k)?, unescape(v)?);
            if k.is_empty() || v.is_empty() {
                return Err(invalid("empty key name or value"));
            }
            keys.push((k, v));
        }

        Ok(Self {
            journey_name,
            keys,
            unique_key,
        })
    }
}

impl fmt::Display for JourneyInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for JourneyInstanceId {
    type Err = JourneyError;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

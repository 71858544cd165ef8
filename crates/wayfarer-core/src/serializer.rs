// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! State serialization.
//!
//! Typed state is converted to a `serde_json::Value` and then to bytes by a
//! pluggable [`StateSerializer`]. The bytes always travel together with their
//! [`StateType`] tag, and decoding checks the tag before touching the payload.

use crate::descriptor::{JourneyState, StateType};
use crate::error::{JourneyError, Result};

/// Byte encoding for state values.
///
/// The default is [`JsonStateSerializer`]. Hosts needing a compact binary
/// format implement this trait and hand it to the runtime builder.
pub trait StateSerializer: Send + Sync {
    /// Encode a state value.
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>>;

    /// Decode bytes produced by [`encode`](Self::encode).
    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value>;
}

/// JSON encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonStateSerializer;

impl StateSerializer for JsonStateSerializer {
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Opaque state payload tagged with its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedState {
    /// Type tag of the encoded state.
    pub state_type: StateType,
    /// Encoded bytes.
    pub payload: Vec<u8>,
}

impl SerializedState {
    /// Encode typed state.
    pub fn from_state<S: JourneyState>(serializer: &dyn StateSerializer, state: &S) -> Result<Self> {
        let value = serde_json::to_value(state)?;
        Self::from_value(serializer, StateType::of::<S>(), &value)
    }

    /// Encode an untyped state value under an explicit tag.
    pub fn from_value(
        serializer: &dyn StateSerializer,
        state_type: StateType,
        value: &serde_json::Value,
    ) -> Result<Self> {
        Ok(Self {
            state_type,
            payload: serializer.encode(value)?,
        })
    }

    /// Decode into `S`, failing with `TypeMismatch` if the tags differ.
    ///
    /// `instance_id` is only used for error reporting.
    pub fn to_state<S: JourneyState>(
        &self,
        serializer: &dyn StateSerializer,
        instance_id: &str,
    ) -> Result<S> {
        let expected = StateType::of::<S>();
        if self.state_type != expected {
            return Err(JourneyError::TypeMismatch {
                instance_id: instance_id.to_string(),
                expected: expected.to_string(),
                actual: self.state_type.to_string(),
            });
        }

        let value = serializer.decode(&self.payload)?;
        Ok(serde_json::from_value(value)?)
    }
}

//! Ready-made serializers and deserializers.
//!
//! The pipeline itself is format-agnostic: a serializer is any
//! `Fn(&P) -> Result<Option<Bytes>>` and a deserializer any
//! `Fn(&P, &OutboundRequest, &ResponseMetadata, Option<&Bytes>) -> Result<R>`.
//! The functions here cover JSON and the "nothing to send / nothing to
//! read" cases and can be passed directly where a hook is expected.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{CallError, Result};
use crate::message::{OutboundRequest, ResponseMetadata};

/// Serialize parameters as a JSON body
///
/// # Errors
///
/// Returns [`CallError::SerializeFailure`] if `serde_json` rejects the value.
pub fn json_body<P: Serialize>(parameters: &P) -> Result<Option<Bytes>> {
    serde_json::to_vec(parameters)
        .map(|body| Some(Bytes::from(body)))
        .map_err(CallError::serialize)
}

/// Deserialize a JSON payload into `R`
///
/// # Errors
///
/// Returns [`CallError::DeserializeFailure`] if the payload is missing or is
/// not valid JSON for `R`.
pub fn json_result<P, R: DeserializeOwned>(
    _parameters: &P,
    _request: &OutboundRequest,
    _response: &ResponseMetadata,
    payload: Option<&Bytes>,
) -> Result<R> {
    let payload = payload.ok_or_else(|| CallError::deserialize("empty payload"))?;
    serde_json::from_slice(payload).map_err(CallError::deserialize)
}

/// Serializer for requests without a body
///
/// # Errors
///
/// Never fails.
pub fn no_body<P>(_parameters: &P) -> Result<Option<Bytes>> {
    Ok(None)
}

/// Deserializer for requests whose response is not interpreted
///
/// # Errors
///
/// Never fails.
pub fn no_result<P>(
    _parameters: &P,
    _request: &OutboundRequest,
    _response: &ResponseMetadata,
    _payload: Option<&Bytes>,
) -> Result<()> {
    Ok(())
}

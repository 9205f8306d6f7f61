//! Per-call context sent to the plugin alongside every request.

use serde_json::json;

use crate::bridge::protocol::RequestId;
use crate::value::{self, ConversionError, GenericMap, GenericValue, Struct};

pub const DIRECTOR_UUID_KEY: &str = "director_uuid";
pub const REQUEST_ID_KEY: &str = "request_id";
pub const VM_KEY: &str = "vm";

/// Keys owned by the bridge. Caller properties never overwrite them.
pub const RESERVED_KEYS: [&str; 3] = [DIRECTOR_UUID_KEY, REQUEST_ID_KEY, VM_KEY];

/// Build the context mapping for one call.
///
/// Always holds `director_uuid` and `request_id`; holds
/// `vm.stemcell.api_version` only when `stemcell_api_version` is non-zero.
/// Properties are merged afterwards. A property named like a reserved key is
/// dropped, even `vm` when no stemcell version was given.
pub fn build_context(
    request_id: &RequestId,
    director_uuid: &str,
    stemcell_api_version: i32,
    properties: Option<&Struct>,
) -> Result<GenericMap, ConversionError> {
    let mut context = GenericMap::new();
    context.insert(
        DIRECTOR_UUID_KEY.to_string(),
        GenericValue::String(director_uuid.to_string()),
    );
    context.insert(
        REQUEST_ID_KEY.to_string(),
        GenericValue::String(request_id.to_string()),
    );

    if stemcell_api_version != 0 {
        context.insert(
            VM_KEY.to_string(),
            json!({"stemcell": {"api_version": stemcell_api_version}}),
        );
    }

    let Some(properties) = properties else {
        return Ok(context);
    };

    for (key, value) in value::to_generic(properties)? {
        if RESERVED_KEYS.contains(&key.as_str()) {
            tracing::warn!(%request_id, key = %key, "Ignoring property that shadows a reserved context key");
            continue;
        }
        context.insert(key, value);
    }

    Ok(context)
}

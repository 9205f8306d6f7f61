//! Wire protocol types for bridge-plugin communication.
//!
//! The plugin reads one [`ExecRequest`] document from stdin and writes one
//! [`ExecResponse`] document to stdout.

use serde::{Deserialize, Deserializer, Serialize};

use crate::value::{GenericMap, GenericValue};

/// Unique identifier for a single CPI call.
///
/// `cpi-` followed by a UUID v4, so concurrent calls never share an id and no
/// counter has to be locked to produce one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub const PREFIX: &'static str = "cpi-";

    pub fn generate() -> Self {
        Self(format!("{}{}", Self::PREFIX, uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// CPI methods understood by plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpiMethod {
    Info,
    CreateVm,
    DeleteVm,
    HasVm,
    RebootVm,
    SetVmMetadata,
    CreateDisk,
    DeleteDisk,
    HasDisk,
    AttachDisk,
    DetachDisk,
}

impl CpiMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::CreateVm => "create_vm",
            Self::DeleteVm => "delete_vm",
            Self::HasVm => "has_vm",
            Self::RebootVm => "reboot_vm",
            Self::SetVmMetadata => "set_vm_metadata",
            Self::CreateDisk => "create_disk",
            Self::DeleteDisk => "delete_disk",
            Self::HasDisk => "has_disk",
            Self::AttachDisk => "attach_disk",
            Self::DetachDisk => "detach_disk",
        }
    }
}

impl std::fmt::Display for CpiMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request written to the plugin's stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecRequest {
    pub method: CpiMethod,
    pub context: GenericMap,
    /// Positional arguments; order is part of each method's contract.
    pub arguments: Vec<GenericValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<u32>,
}

/// Response read from the plugin's stdout. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub log: String,
    #[serde(default)]
    pub error: Option<ExecError>,
    #[serde(default)]
    pub result: GenericValue,
}

/// Error reported by a plugin that ran to completion. Missing fields decode
/// as empty, so a sparse error object is still a domain error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecError {
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub error_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(default)]
    pub ok_to_retry: bool,
}

/// Treat an explicit `null` like an absent field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

//! Typed arguments and results for each CPI method.
//!
//! Every method has an arguments type implementing [`CpiArguments`], which
//! fixes the method name, the positional argument order sent to the plugin
//! and how the plugin's generic `result` decodes into a typed result.

use serde::{Deserialize, Deserializer, Serialize};

use crate::bridge::protocol::{CpiMethod, null_as_default};
use crate::value::{self, ConversionError, GenericValue, Struct};

/// Typed arguments of one CPI method.
pub trait CpiArguments: Send + 'static {
    const METHOD: CpiMethod;

    type Output: Serialize + Send + 'static;

    /// Positional arguments, in the order the plugin expects them.
    fn into_arguments(self) -> Result<Vec<GenericValue>, ArgumentError>;

    /// Decode the plugin's `result` into this method's typed result.
    fn decode_result(result: GenericValue) -> Result<Self::Output, serde_json::Error>;
}

/// A method argument that could not be converted to generic form.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid {argument}: {source}")]
pub struct ArgumentError {
    pub argument: &'static str,
    #[source]
    pub source: ConversionError,
}

fn structure(argument: &'static str, s: &Struct) -> Result<GenericValue, ArgumentError> {
    value::to_generic(s)
        .map(GenericValue::Object)
        .map_err(|source| ArgumentError { argument, source })
}

/// An absent blob travels as `null`.
fn optional_structure(
    argument: &'static str,
    s: Option<&Struct>,
) -> Result<GenericValue, ArgumentError> {
    s.map_or(Ok(GenericValue::Null), |s| structure(argument, s))
}

fn string(s: String) -> GenericValue {
    GenericValue::String(s)
}

/// Arguments of `info`, which takes none. Accepts an absent, null or empty
/// `arguments` field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoArguments;

impl<'de> Deserialize<'de> for NoArguments {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<serde::de::IgnoredAny>::deserialize(deserializer)?;
        Ok(NoArguments)
    }
}

/// `api_version` is absent from plugins speaking CPI API v1.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfoResult {
    #[serde(default, deserialize_with = "null_as_default")]
    pub api_version: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stemcell_formats: Vec<String>,
}

impl CpiArguments for NoArguments {
    const METHOD: CpiMethod = CpiMethod::Info;
    type Output = InfoResult;

    fn into_arguments(self) -> Result<Vec<GenericValue>, ArgumentError> {
        Ok(Vec::new())
    }

    fn decode_result(result: GenericValue) -> Result<InfoResult, serde_json::Error> {
        serde_json::from_value(result)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CreateVmArguments {
    pub agent_id: String,
    pub stemcell_id: String,
    #[serde(default)]
    pub cloud_properties: Option<Struct>,
    #[serde(default)]
    pub networks: Option<Struct>,
    #[serde(default)]
    pub disk_cids: Vec<String>,
    #[serde(default)]
    pub env: Option<Struct>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateVmResult {
    pub vm_cid: String,
}

impl CpiArguments for CreateVmArguments {
    const METHOD: CpiMethod = CpiMethod::CreateVm;
    type Output = CreateVmResult;

    fn into_arguments(self) -> Result<Vec<GenericValue>, ArgumentError> {
        Ok(vec![
            string(self.agent_id),
            string(self.stemcell_id),
            optional_structure("cloud_properties", self.cloud_properties.as_ref())?,
            optional_structure("networks", self.networks.as_ref())?,
            GenericValue::Array(self.disk_cids.into_iter().map(string).collect()),
            optional_structure("env", self.env.as_ref())?,
        ])
    }

    fn decode_result(result: GenericValue) -> Result<CreateVmResult, serde_json::Error> {
        let vm_cid = serde_json::from_value(result)?;
        Ok(CreateVmResult { vm_cid })
    }
}

/// Result of methods whose plugin result carries no information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyResult {}

/// Result of `has_vm` and `has_disk`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistsResult {
    pub exists: bool,
}

fn decode_exists(result: GenericValue) -> Result<ExistsResult, serde_json::Error> {
    let exists = serde_json::from_value(result)?;
    Ok(ExistsResult { exists })
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeleteVmArguments {
    pub vm_cid: String,
}

impl CpiArguments for DeleteVmArguments {
    const METHOD: CpiMethod = CpiMethod::DeleteVm;
    type Output = EmptyResult;

    fn into_arguments(self) -> Result<Vec<GenericValue>, ArgumentError> {
        Ok(vec![string(self.vm_cid)])
    }

    fn decode_result(_: GenericValue) -> Result<EmptyResult, serde_json::Error> {
        Ok(EmptyResult {})
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HasVmArguments {
    pub vm_cid: String,
}

impl CpiArguments for HasVmArguments {
    const METHOD: CpiMethod = CpiMethod::HasVm;
    type Output = ExistsResult;

    fn into_arguments(self) -> Result<Vec<GenericValue>, ArgumentError> {
        Ok(vec![string(self.vm_cid)])
    }

    fn decode_result(result: GenericValue) -> Result<ExistsResult, serde_json::Error> {
        decode_exists(result)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RebootVmArguments {
    pub vm_cid: String,
}

impl CpiArguments for RebootVmArguments {
    const METHOD: CpiMethod = CpiMethod::RebootVm;
    type Output = EmptyResult;

    fn into_arguments(self) -> Result<Vec<GenericValue>, ArgumentError> {
        Ok(vec![string(self.vm_cid)])
    }

    fn decode_result(_: GenericValue) -> Result<EmptyResult, serde_json::Error> {
        Ok(EmptyResult {})
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SetVmMetadataArguments {
    pub vm_cid: String,
    pub metadata: Struct,
}

impl CpiArguments for SetVmMetadataArguments {
    const METHOD: CpiMethod = CpiMethod::SetVmMetadata;
    type Output = EmptyResult;

    fn into_arguments(self) -> Result<Vec<GenericValue>, ArgumentError> {
        Ok(vec![
            string(self.vm_cid),
            structure("metadata", &self.metadata)?,
        ])
    }

    fn decode_result(_: GenericValue) -> Result<EmptyResult, serde_json::Error> {
        Ok(EmptyResult {})
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreateDiskArguments {
    /// Disk size in MiB.
    pub size: u64,
    #[serde(default)]
    pub cloud_properties: Option<Struct>,
    /// VM the disk should be placed near, if any.
    #[serde(default)]
    pub vm_cid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateDiskResult {
    pub disk_cid: String,
}

impl CpiArguments for CreateDiskArguments {
    const METHOD: CpiMethod = CpiMethod::CreateDisk;
    type Output = CreateDiskResult;

    fn into_arguments(self) -> Result<Vec<GenericValue>, ArgumentError> {
        Ok(vec![
            GenericValue::from(self.size),
            optional_structure("cloud_properties", self.cloud_properties.as_ref())?,
            self.vm_cid.map_or(GenericValue::Null, string),
        ])
    }

    fn decode_result(result: GenericValue) -> Result<CreateDiskResult, serde_json::Error> {
        let disk_cid = serde_json::from_value(result)?;
        Ok(CreateDiskResult { disk_cid })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeleteDiskArguments {
    pub disk_cid: String,
}

impl CpiArguments for DeleteDiskArguments {
    const METHOD: CpiMethod = CpiMethod::DeleteDisk;
    type Output = EmptyResult;

    fn into_arguments(self) -> Result<Vec<GenericValue>, ArgumentError> {
        Ok(vec![string(self.disk_cid)])
    }

    fn decode_result(_: GenericValue) -> Result<EmptyResult, serde_json::Error> {
        Ok(EmptyResult {})
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HasDiskArguments {
    pub disk_cid: String,
}

impl CpiArguments for HasDiskArguments {
    const METHOD: CpiMethod = CpiMethod::HasDisk;
    type Output = ExistsResult;

    fn into_arguments(self) -> Result<Vec<GenericValue>, ArgumentError> {
        Ok(vec![string(self.disk_cid)])
    }

    fn decode_result(result: GenericValue) -> Result<ExistsResult, serde_json::Error> {
        decode_exists(result)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AttachDiskArguments {
    pub vm_cid: String,
    pub disk_cid: String,
}

impl CpiArguments for AttachDiskArguments {
    const METHOD: CpiMethod = CpiMethod::AttachDisk;
    type Output = EmptyResult;

    fn into_arguments(self) -> Result<Vec<GenericValue>, ArgumentError> {
        Ok(vec![string(self.vm_cid), string(self.disk_cid)])
    }

    fn decode_result(_: GenericValue) -> Result<EmptyResult, serde_json::Error> {
        Ok(EmptyResult {})
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DetachDiskArguments {
    pub vm_cid: String,
    pub disk_cid: String,
}

impl CpiArguments for DetachDiskArguments {
    const METHOD: CpiMethod = CpiMethod::DetachDisk;
    type Output = EmptyResult;

    fn into_arguments(self) -> Result<Vec<GenericValue>, ArgumentError> {
        Ok(vec![string(self.vm_cid), string(self.disk_cid)])
    }

    fn decode_result(_: GenericValue) -> Result<EmptyResult, serde_json::Error> {
        Ok(EmptyResult {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use serde_json::json;

    #[test]
    fn create_vm_arguments_keep_positional_order() {
        let args = CreateVmArguments {
            agent_id: "agent-1".to_string(),
            stemcell_id: "stemcell-1".to_string(),
            cloud_properties: Some(Struct::new().with("k", "v")),
            networks: Some(Struct::new().with("net", "n")),
            disk_cids: vec!["d1".to_string(), "d2".to_string()],
            env: Some(Struct::new().with("e", "v")),
        };

        assert_eq!(
            args.into_arguments().unwrap(),
            vec![
                json!("agent-1"),
                json!("stemcell-1"),
                json!({"k": "v"}),
                json!({"net": "n"}),
                json!(["d1", "d2"]),
                json!({"e": "v"}),
            ]
        );
    }

    #[test]
    fn create_vm_missing_blobs_are_null() {
        let args: CreateVmArguments =
            serde_json::from_value(json!({"agent_id": "a", "stemcell_id": "s"})).unwrap();

        assert_eq!(
            args.into_arguments().unwrap(),
            vec![json!("a"), json!("s"), json!(null), json!(null), json!([]), json!(null)]
        );
    }

    #[test]
    fn create_vm_reports_which_argument_failed() {
        let args = CreateVmArguments {
            networks: Some(Struct::new().with("bad", Value::unset())),
            ..Default::default()
        };

        let err = args.into_arguments().unwrap_err();
        assert_eq!(err.argument, "networks");
        assert_eq!(err.to_string(), "invalid networks: value at $.bad has no kind set");
    }

    #[test]
    fn no_arguments_accepts_absent_null_and_empty() {
        #[derive(Deserialize)]
        struct Envelope {
            arguments: NoArguments,
        }

        for body in [json!({}), json!({"arguments": null}), json!({"arguments": {}})] {
            let envelope: Envelope = serde_json::from_value(body).unwrap();
            assert_eq!(envelope.arguments, NoArguments);
        }
        assert!(NoArguments.into_arguments().unwrap().is_empty());
    }

    #[test]
    fn info_result_decodes() {
        let info = NoArguments::decode_result(json!({
            "api_version": 37,
            "stemcell_formats": ["f1", "f2"]
        }))
        .unwrap();

        assert_eq!(info.api_version, 37);
        assert_eq!(info.stemcell_formats, vec!["f1", "f2"]);
    }

    #[test]
    fn info_result_accepts_v1_and_null_fields() {
        let v1 = NoArguments::decode_result(json!({"stemcell_formats": ["warden-tar"]})).unwrap();
        assert_eq!(
            v1,
            InfoResult {
                api_version: 0,
                stemcell_formats: vec!["warden-tar".to_string()],
            }
        );

        let nulls =
            NoArguments::decode_result(json!({"api_version": 2, "stemcell_formats": null}))
                .unwrap();
        assert_eq!(nulls.api_version, 2);
        assert!(nulls.stemcell_formats.is_empty());

        assert_eq!(NoArguments::decode_result(json!({})).unwrap(), InfoResult::default());
    }

    #[test]
    fn info_result_rejects_wrong_shape() {
        assert!(NoArguments::decode_result(json!("nope")).is_err());
        assert!(NoArguments::decode_result(json!(null)).is_err());
    }

    #[test]
    fn scalar_results_decode() {
        assert_eq!(
            CreateVmArguments::decode_result(json!("vm-123")).unwrap(),
            CreateVmResult {
                vm_cid: "vm-123".to_string()
            }
        );
        assert!(CreateVmArguments::decode_result(json!({"vm_cid": "x"})).is_err());
        assert_eq!(
            HasVmArguments::decode_result(json!(true)).unwrap(),
            ExistsResult { exists: true }
        );
        assert!(HasDiskArguments::decode_result(json!("yes")).is_err());
        assert_eq!(
            CreateDiskArguments::decode_result(json!("disk-1"))
                .unwrap()
                .disk_cid,
            "disk-1"
        );
    }

    #[test]
    fn void_methods_ignore_result() {
        assert_eq!(
            AttachDiskArguments::decode_result(json!({"path": "/dev/sdb"})).unwrap(),
            EmptyResult {}
        );
        assert_eq!(
            DeleteVmArguments::decode_result(json!(null)).unwrap(),
            EmptyResult {}
        );
    }

    #[test]
    fn create_disk_arguments_order() {
        let args = CreateDiskArguments {
            size: 10240,
            cloud_properties: Some(Struct::new().with("type", "gp3")),
            vm_cid: None,
        };

        assert_eq!(
            args.into_arguments().unwrap(),
            vec![json!(10240), json!({"type": "gp3"}), json!(null)]
        );
    }

    #[test]
    fn disk_attachment_arguments_order() {
        let args = AttachDiskArguments {
            vm_cid: "vm-1".to_string(),
            disk_cid: "disk-1".to_string(),
        };
        assert_eq!(
            args.into_arguments().unwrap(),
            vec![json!("vm-1"), json!("disk-1")]
        );
    }

    #[test]
    fn set_vm_metadata_arguments_order() {
        let args = SetVmMetadataArguments {
            vm_cid: "vm-1".to_string(),
            metadata: Struct::new().with("deployment", "cf").with("index", 0.0),
        };
        assert_eq!(
            args.into_arguments().unwrap(),
            vec![json!("vm-1"), json!({"deployment": "cf", "index": 0})]
        );
    }
}

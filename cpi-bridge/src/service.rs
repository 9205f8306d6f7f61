//! CpiService: transport-agnostic dispatch of CPI calls to plugins.
//!
//! Each call gets a fresh request id and context, its typed arguments are
//! flattened into the method's positional order, and the plugin is run once
//! through the configured [`PluginExecutor`]. Calls share nothing but
//! immutable configuration and the shutdown token.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::bridge::protocol::{CpiMethod, ExecError, ExecRequest, RequestId};
use crate::context;
use crate::executor::{ExecutorError, PluginExecutor};
use crate::methods::{
    ArgumentError, AttachDiskArguments, CpiArguments, CreateDiskArguments, CreateVmArguments,
    DeleteDiskArguments, DeleteVmArguments, DetachDiskArguments, HasDiskArguments,
    HasVmArguments, NoArguments, RebootVmArguments, SetVmMetadataArguments,
};
use crate::plugin::{PluginResolver, ResolveError};
use crate::value::Struct;
use crate::version::VersionInfo;

/// An incoming call for one method.
#[derive(Debug, Clone, Deserialize)]
pub struct CpiRequest<A> {
    /// Plugin to run: a path, or a bare name when plugins are confined to a
    /// directory.
    #[serde(rename = "type")]
    pub plugin: String,
    #[serde(default)]
    pub director_uuid: String,
    #[serde(default)]
    pub stemcell_api_version: i32,
    /// CPI API version forwarded to the plugin.
    #[serde(default)]
    pub api_version: Option<u32>,
    #[serde(default)]
    pub properties: Option<Struct>,
    pub arguments: A,
}

impl<A> CpiRequest<A> {
    pub fn new(plugin: impl Into<String>, director_uuid: impl Into<String>, arguments: A) -> Self {
        Self {
            plugin: plugin.into(),
            director_uuid: director_uuid.into(),
            stemcell_api_version: 0,
            api_version: None,
            properties: None,
            arguments,
        }
    }

    pub fn with_stemcell_api_version(mut self, version: i32) -> Self {
        self.stemcell_api_version = version;
        self
    }

    pub fn with_properties(mut self, properties: Struct) -> Self {
        self.properties = Some(properties);
        self
    }
}

/// Outcome of a call whose plugin ran to completion.
///
/// `result` is `None` whenever the plugin reported a domain error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpiResponse<T> {
    pub request_id: RequestId,
    pub log: String,
    pub error: Option<ExecError>,
    pub result: Option<T>,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    InvalidArgument(#[from] ArgumentError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Transport(#[from] ExecutorError),

    #[error("failed to decode {method} result: {source}")]
    Decode {
        method: CpiMethod,
        #[source]
        source: serde_json::Error,
    },
}

impl DispatchError {
    /// True when the caller's request was at fault rather than the plugin.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::Resolve(_))
    }
}

pub struct CpiService {
    executor: Arc<dyn PluginExecutor>,
    resolver: PluginResolver,
    shutdown: CancellationToken,
    version: VersionInfo,
}

impl CpiService {
    pub fn new(executor: Arc<dyn PluginExecutor>) -> Self {
        Self {
            executor,
            resolver: PluginResolver::new(),
            shutdown: CancellationToken::new(),
            version: VersionInfo::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: PluginResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn version(&self) -> &VersionInfo {
        &self.version
    }

    /// Cancel every in-flight plugin invocation. Calls started afterwards
    /// are cancelled immediately.
    pub fn shutdown(&self) {
        tracing::info!("Cancelling in-flight plugin calls");
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Run one call of method `A::METHOD`.
    pub async fn dispatch<A: CpiArguments>(
        &self,
        request: CpiRequest<A>,
    ) -> Result<CpiResponse<A::Output>, DispatchError> {
        let method = A::METHOD;
        let request_id = RequestId::generate();

        let context = context::build_context(
            &request_id,
            &request.director_uuid,
            request.stemcell_api_version,
            request.properties.as_ref(),
        )
        .map_err(|source| ArgumentError {
            argument: "properties",
            source,
        })?;
        let arguments = request.arguments.into_arguments()?;
        let plugin = self.resolver.resolve(&request.plugin)?;

        let exec_request = ExecRequest {
            method,
            context,
            arguments,
            api_version: request.api_version,
        };

        tracing::debug!(
            %request_id,
            %method,
            plugin = %plugin.display(),
            "Dispatching CPI call"
        );

        let response = self
            .executor
            .execute(&plugin, &exec_request, self.shutdown.child_token())
            .await?;

        if let Some(error) = response.error {
            tracing::info!(
                %request_id,
                %method,
                error_type = %error.error_type,
                ok_to_retry = error.ok_to_retry,
                "Plugin reported an error"
            );
            return Ok(CpiResponse {
                request_id,
                log: response.log,
                error: Some(error),
                result: None,
            });
        }

        let result = A::decode_result(response.result)
            .map_err(|source| DispatchError::Decode { method, source })?;

        tracing::debug!(%request_id, %method, "CPI call completed");

        Ok(CpiResponse {
            request_id,
            log: response.log,
            error: None,
            result: Some(result),
        })
    }

    pub async fn info(
        &self,
        request: CpiRequest<NoArguments>,
    ) -> Result<CpiResponse<<NoArguments as CpiArguments>::Output>, DispatchError> {
        self.dispatch(request).await
    }

    pub async fn create_vm(
        &self,
        request: CpiRequest<CreateVmArguments>,
    ) -> Result<CpiResponse<<CreateVmArguments as CpiArguments>::Output>, DispatchError> {
        self.dispatch(request).await
    }

    pub async fn delete_vm(
        &self,
        request: CpiRequest<DeleteVmArguments>,
    ) -> Result<CpiResponse<<DeleteVmArguments as CpiArguments>::Output>, DispatchError> {
        self.dispatch(request).await
    }

    pub async fn has_vm(
        &self,
        request: CpiRequest<HasVmArguments>,
    ) -> Result<CpiResponse<<HasVmArguments as CpiArguments>::Output>, DispatchError> {
        self.dispatch(request).await
    }

    pub async fn reboot_vm(
        &self,
        request: CpiRequest<RebootVmArguments>,
    ) -> Result<CpiResponse<<RebootVmArguments as CpiArguments>::Output>, DispatchError> {
        self.dispatch(request).await
    }

    pub async fn set_vm_metadata(
        &self,
        request: CpiRequest<SetVmMetadataArguments>,
    ) -> Result<CpiResponse<<SetVmMetadataArguments as CpiArguments>::Output>, DispatchError> {
        self.dispatch(request).await
    }

    pub async fn create_disk(
        &self,
        request: CpiRequest<CreateDiskArguments>,
    ) -> Result<CpiResponse<<CreateDiskArguments as CpiArguments>::Output>, DispatchError> {
        self.dispatch(request).await
    }

    pub async fn delete_disk(
        &self,
        request: CpiRequest<DeleteDiskArguments>,
    ) -> Result<CpiResponse<<DeleteDiskArguments as CpiArguments>::Output>, DispatchError> {
        self.dispatch(request).await
    }

    pub async fn has_disk(
        &self,
        request: CpiRequest<HasDiskArguments>,
    ) -> Result<CpiResponse<<HasDiskArguments as CpiArguments>::Output>, DispatchError> {
        self.dispatch(request).await
    }

    pub async fn attach_disk(
        &self,
        request: CpiRequest<AttachDiskArguments>,
    ) -> Result<CpiResponse<<AttachDiskArguments as CpiArguments>::Output>, DispatchError> {
        self.dispatch(request).await
    }

    pub async fn detach_disk(
        &self,
        request: CpiRequest<DetachDiskArguments>,
    ) -> Result<CpiResponse<<DetachDiskArguments as CpiArguments>::Output>, DispatchError> {
        self.dispatch(request).await
    }
}

//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::methods::{
    AttachDiskArguments, CpiArguments, CreateDiskArguments, CreateVmArguments,
    DeleteDiskArguments, DeleteVmArguments, DetachDiskArguments, HasDiskArguments,
    HasVmArguments, NoArguments, RebootVmArguments, SetVmMetadataArguments,
};
use crate::service::{CpiRequest, CpiService, DispatchError};
use crate::version::VersionInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Ready,
}

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: HealthStatus,
    pub version: VersionInfo,
}

async fn health_check(State(service): State<Arc<CpiService>>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: HealthStatus::Ready,
        version: service.version().clone(),
    })
}

fn status_for(err: &DispatchError) -> StatusCode {
    if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::BAD_GATEWAY
    }
}

/// Handler shared by every method route.
async fn call<A>(
    State(service): State<Arc<CpiService>>,
    Json(request): Json<CpiRequest<A>>,
) -> Response
where
    A: CpiArguments + DeserializeOwned,
{
    let plugin = request.plugin.clone();
    match service.dispatch(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                tracing::error!(method = %A::METHOD, %plugin, error = %e, "CPI call failed");
            } else {
                tracing::warn!(method = %A::METHOD, %plugin, error = %e, "Rejected CPI call");
            }
            (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
        }
    }
}

pub fn routes(service: Arc<CpiService>) -> Router {
    Router::new()
        .route("/health-check", get(health_check))
        .route("/info", post(call::<NoArguments>))
        .route("/create_vm", post(call::<CreateVmArguments>))
        .route("/delete_vm", post(call::<DeleteVmArguments>))
        .route("/has_vm", post(call::<HasVmArguments>))
        .route("/reboot_vm", post(call::<RebootVmArguments>))
        .route("/set_vm_metadata", post(call::<SetVmMetadataArguments>))
        .route("/create_disk", post(call::<CreateDiskArguments>))
        .route("/delete_disk", post(call::<DeleteDiskArguments>))
        .route("/has_disk", post(call::<HasDiskArguments>))
        .route("/attach_disk", post(call::<AttachDiskArguments>))
        .route("/detach_disk", post(call::<DetachDiskArguments>))
        .with_state(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    use crate::bridge::protocol::{ExecError, ExecResponse};
    use crate::executor::ExecutorError;
    use crate::plugin::PluginResolver;
    use crate::test_support::MockExecutor;

    async fn response_json(response: Response) -> serde_json::Value {
        let body = response.into_body();
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn app(executor: MockExecutor) -> Router {
        routes(Arc::new(CpiService::new(Arc::new(executor))))
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_check_returns_status_and_version() {
        let response = app(MockExecutor::with_result(json!(null)))
            .oneshot(Request::get("/health-check").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let json = response_json(response).await;
        assert_eq!(json["status"], "READY");
        assert!(json["version"]["cpi_bridge"].is_string());
    }

    #[tokio::test]
    async fn info_returns_typed_result() {
        let executor = MockExecutor::with_result(json!({
            "api_version": 37,
            "stemcell_formats": ["f1", "f2"]
        }));

        let response = app(executor)
            .oneshot(post_json(
                "/info",
                json!({"type": "/plugins/cpi", "director_uuid": "director-1"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let json = response_json(response).await;
        assert_eq!(
            json["result"],
            json!({"api_version": 37, "stemcell_formats": ["f1", "f2"]})
        );
        assert!(json["error"].is_null());
        assert!(json["request_id"].as_str().unwrap().starts_with("cpi-"));
    }

    #[tokio::test]
    async fn create_vm_returns_vm_cid() {
        let executor = Arc::new(MockExecutor::with_result(json!("vm-123")));
        let app = routes(Arc::new(CpiService::new(executor.clone())));

        let response = app
            .oneshot(post_json(
                "/create_vm",
                json!({
                    "type": "/plugins/cpi",
                    "director_uuid": "director-1",
                    "arguments": {
                        "agent_id": "agent-1",
                        "stemcell_id": "stemcell-1",
                        "cloud_properties": {"instance_type": "m5.large"},
                        "networks": {"default": {"type": "dynamic"}},
                        "disk_cids": [],
                        "env": {}
                    }
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await["result"], json!({"vm_cid": "vm-123"}));
        assert_eq!(
            json!(executor.only_request().arguments),
            json!([
                "agent-1",
                "stemcell-1",
                {"instance_type": "m5.large"},
                {"default": {"type": "dynamic"}},
                [],
                {}
            ])
        );
    }

    #[tokio::test]
    async fn domain_error_is_ok_with_null_result() {
        let executor = MockExecutor::returning(ExecResponse {
            log: "plugin log\n".to_string(),
            error: Some(ExecError {
                error_type: "Bosh::Clouds::VMNotFound".to_string(),
                message: "vm-1 not found".to_string(),
                ok_to_retry: false,
            }),
            result: json!(null),
        });

        let response = app(executor)
            .oneshot(post_json(
                "/reboot_vm",
                json!({"type": "cpi", "arguments": {"vm_cid": "vm-1"}}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let json = response_json(response).await;
        assert_eq!(json["error"]["type"], "Bosh::Clouds::VMNotFound");
        assert_eq!(json["error"]["ok_to_retry"], false);
        assert!(json["result"].is_null());
        assert_eq!(json["log"], "plugin log\n");
    }

    #[tokio::test]
    async fn transport_failure_is_bad_gateway() {
        let executor = MockExecutor::new(|_| Err(ExecutorError::MissingResponse));

        let response = app(executor)
            .oneshot(post_json("/has_vm", json!({"type": "cpi", "arguments": {"vm_cid": "vm-1"}})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(response_json(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn decode_failure_is_bad_gateway() {
        let executor = MockExecutor::with_result(json!("not-a-bool"));

        let response = app(executor)
            .oneshot(post_json(
                "/has_disk",
                json!({"type": "cpi", "arguments": {"disk_cid": "disk-1"}}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json = response_json(response).await;
        assert!(
            json["error"]
                .as_str()
                .unwrap()
                .contains("failed to decode has_disk result")
        );
    }

    #[tokio::test]
    async fn rejected_plugin_is_bad_request() {
        let service = CpiService::new(Arc::new(MockExecutor::with_result(json!(null))))
            .with_resolver(PluginResolver::confined_to("/plugins"));

        let response = routes(Arc::new(service))
            .oneshot(post_json("/info", json!({"type": "../bin/sh"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_body_is_unprocessable() {
        let response = app(MockExecutor::with_result(json!(null)))
            .oneshot(post_json("/create_vm", json!({"type": "cpi", "arguments": {}})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn void_method_returns_empty_result() {
        let response = app(MockExecutor::with_result(json!("whatever")))
            .oneshot(post_json(
                "/detach_disk",
                json!({"type": "cpi", "arguments": {"vm_cid": "vm-1", "disk_cid": "disk-1"}}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await["result"], json!({}));
    }
}

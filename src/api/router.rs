//! `/configMap` REST routes

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use k8s_openapi::api::core::v1::ConfigMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::auth::{Authenticator, require_role};
use super::error::ApiResult;
use crate::k8s::configmaps::ConfigMapService;

#[derive(Clone)]
pub struct AppState {
    pub service: ConfigMapService,
}

/// Build the application router. `/configMap` routes are guarded when `auth` is set.
pub fn router(service: ConfigMapService, auth: Option<Arc<Authenticator>>) -> Router {
    let mut config_maps = Router::new()
        .route("/configMap", get(list_all))
        .route("/configMap/", get(list_all))
        .route("/configMap/namespace/{ns}", get(list_namespace))
        .route("/configMap/namespace/{ns}/label/{key}", get(by_label))
        .route("/configMap/namespace/{ns}/label/{key}/{value}", get(by_label_value))
        .route("/configMap/namespace/{ns}/annotation/{key}", get(by_annotation))
        .route(
            "/configMap/namespace/{ns}/annotation/{key}/{value}",
            get(by_annotation_value),
        )
        .route("/configMap/namespace/{ns}/name/{name}", get(get_one))
        .route(
            "/configMap/namespace/{ns}/name/{name}/annotation/{key}/{value}",
            post(add_annotation),
        )
        .route(
            "/configMap/namespace/{ns}/name/{name}/label/{key}/{value}",
            post(add_label),
        )
        .route(
            "/configMap/namespace/{ns}/findByAnnotations",
            post(find_by_annotations),
        )
        .route("/configMap/namespace/{ns}/findByLabels", post(find_by_labels))
        .route(
            "/configMap/{ns}",
            post(create).put(update).delete(delete_body),
        )
        .route("/configMap/{ns}/{name}", delete(delete_by_name))
        .with_state(AppState { service });

    if let Some(auth) = auth {
        config_maps = config_maps.route_layer(middleware::from_fn_with_state(auth, require_role));
    }

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .merge(config_maps)
        .layer(TraceLayer::new_for_http())
}

type ConfigMaps = ApiResult<Json<Vec<ConfigMap>>>;

async fn list_all(State(state): State<AppState>) -> ConfigMaps {
    Ok(Json(state.service.config_maps().await?))
}

async fn list_namespace(State(state): State<AppState>, Path(ns): Path<String>) -> ConfigMaps {
    Ok(Json(state.service.config_maps_in_namespace(&ns).await?))
}

async fn by_label(
    State(state): State<AppState>,
    Path((ns, key)): Path<(String, String)>,
) -> ConfigMaps {
    Ok(Json(state.service.find_by_label(&ns, &key).await?))
}

async fn by_label_value(
    State(state): State<AppState>,
    Path((ns, key, value)): Path<(String, String, String)>,
) -> ConfigMaps {
    Ok(Json(state.service.find_by_label_value(&ns, &key, &value).await?))
}

async fn by_annotation(
    State(state): State<AppState>,
    Path((ns, key)): Path<(String, String)>,
) -> ConfigMaps {
    Ok(Json(state.service.find_by_annotation(&ns, &key).await?))
}

async fn by_annotation_value(
    State(state): State<AppState>,
    Path((ns, key, value)): Path<(String, String, String)>,
) -> ConfigMaps {
    Ok(Json(
        state
            .service
            .find_by_annotation_value(&ns, &key, &value)
            .await?,
    ))
}

/// A missing ConfigMap is an empty 204, not an error
async fn get_one(
    State(state): State<AppState>,
    Path((ns, name)): Path<(String, String)>,
) -> ApiResult<Response> {
    Ok(match state.service.get(&ns, &name).await? {
        Some(config_map) => Json(config_map).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

async fn create(
    State(state): State<AppState>,
    Path(ns): Path<String>,
    body: Result<Json<ConfigMap>, JsonRejection>,
) -> ApiResult<Json<ConfigMap>> {
    let Json(config_map) = body?;
    Ok(Json(state.service.create(&ns, config_map).await?))
}

async fn update(
    State(state): State<AppState>,
    Path(ns): Path<String>,
    body: Result<Json<ConfigMap>, JsonRejection>,
) -> ApiResult<Json<ConfigMap>> {
    let Json(config_map) = body?;
    Ok(Json(state.service.update(&ns, config_map).await?))
}

async fn delete_body(
    State(state): State<AppState>,
    Path(ns): Path<String>,
    body: Result<Json<ConfigMap>, JsonRejection>,
) -> ApiResult<Json<bool>> {
    let Json(config_map) = body?;
    Ok(Json(state.service.delete(&ns, &config_map).await?))
}

async fn delete_by_name(
    State(state): State<AppState>,
    Path((ns, name)): Path<(String, String)>,
) -> ApiResult<Json<bool>> {
    Ok(Json(state.service.delete_by_name(&ns, &name).await?))
}

// a missing ConfigMap is logged by the service and still answers 204
async fn add_annotation(
    State(state): State<AppState>,
    Path((ns, name, key, value)): Path<(String, String, String, String)>,
) -> ApiResult<StatusCode> {
    state.service.add_annotation(&ns, &name, &key, &value).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_label(
    State(state): State<AppState>,
    Path((ns, name, key, value)): Path<(String, String, String, String)>,
) -> ApiResult<StatusCode> {
    state.service.add_label(&ns, &name, &key, &value).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn find_by_annotations(
    State(state): State<AppState>,
    Path(ns): Path<String>,
    body: Result<Json<BTreeMap<String, String>>, JsonRejection>,
) -> ConfigMaps {
    let Json(annotations) = body?;
    Ok(Json(state.service.find_by_annotations(&ns, &annotations).await?))
}

async fn find_by_labels(
    State(state): State<AppState>,
    Path(ns): Path<String>,
    body: Result<Json<BTreeMap<String, String>>, JsonRejection>,
) -> ConfigMaps {
    let Json(labels) = body?;
    Ok(Json(state.service.find_by_labels(&ns, &labels).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::auth::{Principal, TokenValidator};
    use crate::api::error::{ApiError, ErrorResponse};
    use crate::k8s::configmaps::MemoryConfigMapStore;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    async fn seeded_service() -> ConfigMapService {
        let service = ConfigMapService::new(Arc::new(MemoryConfigMapStore::new()));
        let seed = json!([
            { "metadata": { "name": "web", "labels": { "app": "shop", "tier": "web" },
                            "annotations": { "owner": "alice" } },
              "data": { "color": "blue" } },
            { "metadata": { "name": "db", "labels": { "app": "shop", "tier": "db" },
                            "annotations": { "owner": "bob" } } },
        ]);
        for cm in serde_json::from_value::<Vec<ConfigMap>>(seed).unwrap() {
            service.create("shop", cm).await.unwrap();
        }
        service
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    fn names(body: &[u8]) -> Vec<String> {
        serde_json::from_slice::<Vec<ConfigMap>>(body)
            .unwrap()
            .into_iter()
            .filter_map(|cm| cm.metadata.name)
            .collect()
    }

    #[tokio::test]
    async fn test_healthz() {
        let app = router(seeded_service().await, None);
        let (status, body) = send(&app, "GET", "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn test_list_routes() {
        let app = router(seeded_service().await, None);

        let (status, body) = send(&app, "GET", "/configMap", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(names(&body), ["db", "web"]);

        let (status, _) = send(&app, "GET", "/configMap/", None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app, "GET", "/configMap/namespace/shop", None).await;
        assert_eq!(names(&body).len(), 2);

        let (_, body) = send(&app, "GET", "/configMap/namespace/other", None).await;
        assert!(names(&body).is_empty());
    }

    #[tokio::test]
    async fn test_label_and_annotation_routes() {
        let app = router(seeded_service().await, None);

        let (_, body) = send(&app, "GET", "/configMap/namespace/shop/label/tier", None).await;
        assert_eq!(names(&body).len(), 2);
        let (_, body) = send(&app, "GET", "/configMap/namespace/shop/label/tier/db", None).await;
        assert_eq!(names(&body), ["db"]);

        let (_, body) = send(&app, "GET", "/configMap/namespace/shop/annotation/owner", None).await;
        assert_eq!(names(&body).len(), 2);
        let (_, body) =
            send(&app, "GET", "/configMap/namespace/shop/annotation/owner/alice", None).await;
        assert_eq!(names(&body), ["web"]);

        let (_, body) = send(
            &app,
            "POST",
            "/configMap/namespace/shop/findByLabels",
            Some(json!({ "tier": "web" })),
        )
        .await;
        assert_eq!(names(&body), ["web"]);

        let (_, body) = send(
            &app,
            "POST",
            "/configMap/namespace/shop/findByAnnotations",
            Some(json!({ "owner": "bob" })),
        )
        .await;
        assert_eq!(names(&body), ["db"]);
    }

    #[tokio::test]
    async fn test_get_one() {
        let app = router(seeded_service().await, None);

        let (status, body) = send(&app, "GET", "/configMap/namespace/shop/name/web", None).await;
        assert_eq!(status, StatusCode::OK);
        let cm: ConfigMap = serde_json::from_slice(&body).unwrap();
        assert_eq!(cm.data.unwrap().get("color").map(String::as_str), Some("blue"));

        let (status, body) =
            send(&app, "GET", "/configMap/namespace/shop/name/missing", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_create_update_delete() {
        let app = router(seeded_service().await, None);
        let body = json!({ "metadata": { "name": "new", "namespace": "ignored" }, "data": { "a": "1" } });

        let (status, created) = send(&app, "POST", "/configMap/team", Some(body.clone())).await;
        assert_eq!(status, StatusCode::OK);
        let created: ConfigMap = serde_json::from_slice(&created).unwrap();
        assert_eq!(created.metadata.namespace.as_deref(), Some("team"));

        let (status, _) = send(&app, "POST", "/configMap/team", Some(body.clone())).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let changed = json!({ "metadata": { "name": "new" }, "data": { "a": "2" } });
        let (status, updated) = send(&app, "PUT", "/configMap/team", Some(changed)).await;
        assert_eq!(status, StatusCode::OK);
        let updated: ConfigMap = serde_json::from_slice(&updated).unwrap();
        assert_eq!(updated.data.unwrap().get("a").map(String::as_str), Some("2"));

        let (status, deleted) = send(&app, "DELETE", "/configMap/team", Some(body.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deleted, b"true");

        let (_, deleted) = send(&app, "DELETE", "/configMap/team", Some(body)).await;
        assert_eq!(deleted, b"false");

        let (_, deleted) = send(&app, "DELETE", "/configMap/shop/web", None).await;
        assert_eq!(deleted, b"true");
        let (_, deleted) = send(&app, "DELETE", "/configMap/shop/web", None).await;
        assert_eq!(deleted, b"false");
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let app = router(seeded_service().await, None);

        let (status, _) = send(&app, "POST", "/configMap/team", Some(json!({ "data": {} }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "POST", "/configMap/team", Some(json!("not a configmap"))).await;
        assert!(status.is_client_error());

        let (status, body) = send(&app, "GET", "/configMap/namespace/Bad_NS", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.error, "validation_error");
    }

    #[tokio::test]
    async fn test_add_annotation_and_label() {
        let app = router(seeded_service().await, None);

        let (status, _) = send(
            &app,
            "POST",
            "/configMap/namespace/shop/name/web/annotation/reviewed/yes",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) =
            send(&app, "POST", "/configMap/namespace/shop/name/web/label/stage/prod", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, body) = send(&app, "GET", "/configMap/namespace/shop/label/stage/prod", None).await;
        assert_eq!(names(&body), ["web"]);
        let (_, body) =
            send(&app, "GET", "/configMap/namespace/shop/annotation/reviewed/yes", None).await;
        assert_eq!(names(&body), ["web"]);

        let (status, _) = send(
            &app,
            "POST",
            "/configMap/namespace/shop/name/missing/label/stage/prod",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(
            &app,
            "POST",
            "/configMap/namespace/shop/name/missing/annotation/reviewed/yes",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        // nothing was created along the way
        let (_, body) = send(&app, "GET", "/configMap/namespace/shop", None).await;
        assert_eq!(names(&body), ["db", "web"]);
    }

    struct FixedToken;

    #[async_trait]
    impl TokenValidator for FixedToken {
        async fn validate(&self, token: &str) -> Result<Principal, ApiError> {
            let roles = match token {
                "user-token" => vec!["user".to_string()],
                "admin-token" => vec!["admin".to_string()],
                _ => return Err(ApiError::Unauthorized("unknown token".to_string())),
            };
            Ok(Principal {
                subject: None,
                username: None,
                roles,
            })
        }
    }

    #[tokio::test]
    async fn test_auth_guard() {
        let auth = Arc::new(Authenticator::new(
            Arc::new(FixedToken),
            vec!["serviceAccount".to_string(), "user".to_string()],
        ));
        let app = router(seeded_service().await, Some(auth));

        let (status, _) = send(&app, "GET", "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, "GET", "/configMap", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = |token: &str| {
            Request::builder()
                .uri("/configMap")
                .header("authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(request("user-token")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(request("admin-token")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app.clone().oneshot(request("forged")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

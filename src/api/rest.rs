//! REST API Handlers
//!
//! Thin JSON adapter over the [`DatasetManager`]. Every request body is one
//! of the typed configs from [`crate::zfs::dataset::types`]; results come
//! back as `{"result": ...}` and failures as the serialized [`RodentError`]
//! with its registered HTTP status.

use axum::{
    extract::{rejection::JsonRejection, Json, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::error::{ErrorCode, RodentError, Result};
use crate::zfs::dataset::{
    AllowConfig, BookmarkConfig, CloneConfig, CreateConfig, DatasetManager, DatasetType,
    DestroyConfig, DiffConfig, InheritConfig, ListConfig, MountConfig, NameConfig,
    PropertyConfig, RenameConfig, RollbackConfig, SetPropertyConfig, ShareConfig,
    SnapshotConfig, TransferConfig, UnallowConfig, UnmountConfig,
};

/// A JSON body whose rejection is turned into a validation error
type Payload<T> = std::result::Result<Json<T>, JsonRejection>;

type ApiResult = std::result::Result<Response, RodentError>;

/// Successful body of read operations
#[derive(Debug, Serialize)]
struct ResultBody<T> {
    result: T,
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    manager: Arc<DatasetManager>,
    request_timeout: Duration,
}

impl RestRouter {
    pub fn new(manager: Arc<DatasetManager>, request_timeout: Duration) -> Self {
        Self {
            manager,
            request_timeout,
        }
    }

    /// Build the Axum router
    ///
    /// Transfers are exempt from the request timeout; a stream runs for as
    /// long as the data takes.
    pub fn build(self) -> Router {
        let state = AppState {
            manager: self.manager,
        };

        let bounded = Router::new()
            // Listing
            .route("/api/v1/datasets/list", post(list_datasets))
            .route("/api/v1/filesystems/list", post(list_filesystems))
            .route("/api/v1/volumes/list", post(list_volumes))
            .route("/api/v1/snapshots/list", post(list_snapshots))
            .route("/api/v1/bookmarks/list", post(list_bookmarks))
            // Lifecycle
            .route("/api/v1/filesystems", post(create_filesystem))
            .route("/api/v1/volumes", post(create_volume))
            .route("/api/v1/datasets", delete(destroy_dataset))
            .route("/api/v1/datasets/rename", post(rename_dataset))
            // Properties
            .route(
                "/api/v1/datasets/property",
                post(get_property).put(set_property),
            )
            .route("/api/v1/datasets/property/inherit", put(inherit_property))
            .route("/api/v1/datasets/properties", post(list_properties))
            // Snapshots, clones, bookmarks
            .route("/api/v1/snapshots", post(create_snapshot))
            .route("/api/v1/snapshots/rollback", post(rollback_snapshot))
            .route("/api/v1/clones", post(create_clone))
            .route("/api/v1/clones/promote", post(promote_clone))
            .route("/api/v1/bookmarks", post(create_bookmark))
            // Mounting and sharing
            .route("/api/v1/datasets/mount", post(mount_dataset))
            .route("/api/v1/datasets/unmount", post(unmount_dataset))
            .route("/api/v1/datasets/share", post(share_dataset))
            .route("/api/v1/datasets/unshare", post(unshare_dataset))
            // Diff and delegation
            .route("/api/v1/datasets/diff", post(diff_dataset))
            .route(
                "/api/v1/permissions",
                post(allow_permissions).delete(unallow_permissions),
            )
            .route("/api/v1/permissions/list", post(list_permissions))
            .route("/api/v1/transfers/resume-token", post(get_resume_token))
            .layer(middleware::from_fn_with_state(
                self.request_timeout,
                request_deadline,
            ));

        Router::new()
            .merge(bounded)
            .route("/api/v1/transfers", post(send_receive))
            .route("/health", get(health_check))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    manager: Arc<DatasetManager>,
}

// =============================================================================
// Error rendering
// =============================================================================

impl IntoResponse for RodentError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            debug!("Request rejected: {}", self);
        }
        (status, Json(self)).into_response()
    }
}

fn body<T>(payload: Payload<T>) -> Result<T> {
    payload.map(|Json(value)| value).map_err(|rejection| {
        RodentError::new(ErrorCode::ServerRequestValidation, rejection.body_text())
    })
}

/// Answer with `ServerTimeout` once a request outlives `limit`
async fn request_deadline(State(limit): State<Duration>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    match tokio::time::timeout(limit, next.run(request)).await {
        Ok(response) => response,
        Err(_) => RodentError::new(
            ErrorCode::ServerTimeout,
            format!("{} exceeded {}s", path, limit.as_secs_f64()),
        )
        .into_response(),
    }
}

/// Run one request's engine work on its own task
///
/// The work sees a token that is cancelled as soon as the handler is
/// dropped, whether by the request deadline or a closed connection. The
/// task itself keeps running until the executor has killed and reaped its
/// children.
async fn scoped<T, F, Fut>(work: F) -> Result<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let ctx = CancellationToken::new();
    let _guard = ctx.clone().drop_guard();
    tokio::spawn(work(ctx))
        .await
        .map_err(|e| RodentError::from_error(&e, ErrorCode::ServerResponseError))?
}

fn with_result<T: Serialize>(result: T) -> Response {
    (StatusCode::OK, Json(ResultBody { result })).into_response()
}

// =============================================================================
// Listing
// =============================================================================

async fn list_datasets(State(state): State<AppState>, payload: Payload<ListConfig>) -> ApiResult {
    list_typed(state, body(payload)?, None).await
}

async fn list_filesystems(State(state): State<AppState>, payload: Payload<ListConfig>) -> ApiResult {
    list_typed(state, body(payload)?, Some(DatasetType::Filesystem)).await
}

async fn list_volumes(State(state): State<AppState>, payload: Payload<ListConfig>) -> ApiResult {
    list_typed(state, body(payload)?, Some(DatasetType::Volume)).await
}

async fn list_snapshots(State(state): State<AppState>, payload: Payload<ListConfig>) -> ApiResult {
    list_typed(state, body(payload)?, Some(DatasetType::Snapshot)).await
}

async fn list_bookmarks(State(state): State<AppState>, payload: Payload<ListConfig>) -> ApiResult {
    list_typed(state, body(payload)?, Some(DatasetType::Bookmark)).await
}

async fn list_typed(state: AppState, mut config: ListConfig, kind: Option<DatasetType>) -> ApiResult {
    if let Some(kind) = kind {
        config.dataset_type = kind;
    }
    let datasets = scoped(move |ctx| async move { state.manager.list(&ctx, &config).await }).await?;
    Ok(with_result(datasets))
}

// =============================================================================
// Lifecycle
// =============================================================================

async fn create_filesystem(State(state): State<AppState>, payload: Payload<CreateConfig>) -> ApiResult {
    let config = body(payload)?;
    scoped(move |ctx| async move { state.manager.create_filesystem(&ctx, &config).await }).await?;
    Ok(StatusCode::CREATED.into_response())
}

async fn create_volume(State(state): State<AppState>, payload: Payload<CreateConfig>) -> ApiResult {
    let config = body(payload)?;
    scoped(move |ctx| async move { state.manager.create_volume(&ctx, &config).await }).await?;
    Ok(StatusCode::CREATED.into_response())
}

async fn destroy_dataset(State(state): State<AppState>, payload: Payload<DestroyConfig>) -> ApiResult {
    let config = body(payload)?;
    scoped(move |ctx| async move { state.manager.destroy(&ctx, &config).await }).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn rename_dataset(State(state): State<AppState>, payload: Payload<RenameConfig>) -> ApiResult {
    let config = body(payload)?;
    scoped(move |ctx| async move { state.manager.rename(&ctx, &config).await }).await?;
    Ok(StatusCode::OK.into_response())
}

// =============================================================================
// Properties
// =============================================================================

async fn get_property(State(state): State<AppState>, payload: Payload<PropertyConfig>) -> ApiResult {
    let config = body(payload)?;
    let property =
        scoped(move |ctx| async move { state.manager.get_property(&ctx, &config).await }).await?;
    Ok(with_result(property))
}

async fn set_property(State(state): State<AppState>, payload: Payload<SetPropertyConfig>) -> ApiResult {
    let config = body(payload)?;
    scoped(move |ctx| async move { state.manager.set_property(&ctx, &config).await }).await?;
    Ok(StatusCode::CREATED.into_response())
}

async fn inherit_property(State(state): State<AppState>, payload: Payload<InheritConfig>) -> ApiResult {
    let config = body(payload)?;
    scoped(move |ctx| async move { state.manager.inherit_property(&ctx, &config).await }).await?;
    Ok(StatusCode::CREATED.into_response())
}

async fn list_properties(State(state): State<AppState>, payload: Payload<NameConfig>) -> ApiResult {
    let config = body(payload)?;
    let properties =
        scoped(move |ctx| async move { state.manager.list_properties(&ctx, &config).await }).await?;
    Ok(with_result(properties))
}

// =============================================================================
// Snapshots, clones, bookmarks
// =============================================================================

async fn create_snapshot(State(state): State<AppState>, payload: Payload<SnapshotConfig>) -> ApiResult {
    let config = body(payload)?;
    scoped(move |ctx| async move { state.manager.create_snapshot(&ctx, &config).await }).await?;
    Ok(StatusCode::CREATED.into_response())
}

async fn rollback_snapshot(State(state): State<AppState>, payload: Payload<RollbackConfig>) -> ApiResult {
    let config = body(payload)?;
    scoped(move |ctx| async move { state.manager.rollback(&ctx, &config).await }).await?;
    Ok(StatusCode::OK.into_response())
}

async fn create_clone(State(state): State<AppState>, payload: Payload<CloneConfig>) -> ApiResult {
    let config = body(payload)?;
    scoped(move |ctx| async move { state.manager.create_clone(&ctx, &config).await }).await?;
    Ok(StatusCode::CREATED.into_response())
}

async fn promote_clone(State(state): State<AppState>, payload: Payload<NameConfig>) -> ApiResult {
    let config = body(payload)?;
    scoped(move |ctx| async move { state.manager.promote_clone(&ctx, &config).await }).await?;
    Ok(StatusCode::OK.into_response())
}

async fn create_bookmark(State(state): State<AppState>, payload: Payload<BookmarkConfig>) -> ApiResult {
    let config = body(payload)?;
    scoped(move |ctx| async move { state.manager.create_bookmark(&ctx, &config).await }).await?;
    Ok(StatusCode::CREATED.into_response())
}

// =============================================================================
// Mounting and sharing
// =============================================================================

async fn mount_dataset(State(state): State<AppState>, payload: Payload<MountConfig>) -> ApiResult {
    let config = body(payload)?;
    scoped(move |ctx| async move { state.manager.mount(&ctx, &config).await }).await?;
    Ok(StatusCode::OK.into_response())
}

async fn unmount_dataset(State(state): State<AppState>, payload: Payload<UnmountConfig>) -> ApiResult {
    let config = body(payload)?;
    scoped(move |ctx| async move { state.manager.unmount(&ctx, &config).await }).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn share_dataset(State(state): State<AppState>, payload: Payload<ShareConfig>) -> ApiResult {
    let config = body(payload)?;
    scoped(move |ctx| async move { state.manager.share(&ctx, &config).await }).await?;
    Ok(StatusCode::OK.into_response())
}

async fn unshare_dataset(State(state): State<AppState>, payload: Payload<ShareConfig>) -> ApiResult {
    let config = body(payload)?;
    scoped(move |ctx| async move { state.manager.unshare(&ctx, &config).await }).await?;
    Ok(StatusCode::OK.into_response())
}

// =============================================================================
// Diff and delegation
// =============================================================================

async fn diff_dataset(State(state): State<AppState>, payload: Payload<DiffConfig>) -> ApiResult {
    let config = body(payload)?;
    let changes = scoped(move |ctx| async move { state.manager.diff(&ctx, &config).await }).await?;
    Ok(with_result(changes))
}

async fn allow_permissions(State(state): State<AppState>, payload: Payload<AllowConfig>) -> ApiResult {
    let config = body(payload)?;
    scoped(move |ctx| async move { state.manager.allow(&ctx, &config).await }).await?;
    Ok(StatusCode::CREATED.into_response())
}

async fn unallow_permissions(State(state): State<AppState>, payload: Payload<UnallowConfig>) -> ApiResult {
    let config = body(payload)?;
    scoped(move |ctx| async move { state.manager.unallow(&ctx, &config).await }).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn list_permissions(State(state): State<AppState>, payload: Payload<NameConfig>) -> ApiResult {
    let config = body(payload)?;
    let permissions =
        scoped(move |ctx| async move { state.manager.list_permissions(&ctx, &config).await })
            .await?;
    Ok(with_result(permissions))
}

// =============================================================================
// Transfers
// =============================================================================

async fn send_receive(State(state): State<AppState>, payload: Payload<TransferConfig>) -> ApiResult {
    let config = body(payload)?;
    info!("Transfer requested into {}", config.receive_config.target);
    scoped(move |ctx| async move {
        state
            .manager
            .send_receive(&ctx, &config.send_config, &config.receive_config)
            .await
    })
    .await?;
    Ok(StatusCode::OK.into_response())
}

async fn get_resume_token(State(state): State<AppState>, payload: Payload<NameConfig>) -> ApiResult {
    let config = body(payload)?;
    let token =
        scoped(move |ctx| async move { state.manager.get_resume_token(&ctx, &config).await })
            .await?;
    Ok(with_result(token))
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

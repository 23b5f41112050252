use axum::{
  extract::{
    rejection::{JsonRejection, PathRejection, QueryRejection},
    Path, Query, Request, State,
  },
  http::StatusCode,
  middleware::Next,
  response::{IntoResponse, Response},
  routing::{get, patch},
  Extension, Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::auth::{authenticate, AuthError, Role};
use super::config::{AuthSection, ServerConfig};
use crate::service::{BannerError, BannerResolver};
use crate::types::{BannerFilter, BannerId, BannerPatch, Content, FeatureId, NewBanner, TagId};

#[derive(Clone)]
pub struct AppState {
  pub resolver: Arc<BannerResolver>,
  pub auth: Arc<AuthSection>,
}

impl AppState {
  pub fn new(resolver: Arc<BannerResolver>, auth: AuthSection) -> Self {
    Self {
      resolver,
      auth: Arc::new(auth),
    }
  }
}

/// Build the HTTP router with auth, timeout, tracing and CORS layers
pub fn router(state: AppState, config: &ServerConfig) -> Router {
  let admin_routes = Router::new()
    .route("/banner", get(list_banners).post(create_banner))
    .route("/banner/{id}", patch(update_banner).delete(delete_banner))
    .route_layer(axum::middleware::from_fn(require_admin));

  let api = Router::new()
    .route("/user_banner", get(user_banner))
    .merge(admin_routes)
    .route_layer(axum::middleware::from_fn_with_state(
      state.clone(),
      auth_middleware,
    ));

  let app = Router::new()
    // Health endpoints are always public
    .route("/health", get(health_check))
    .route("/ready", get(readiness_check))
    .merge(api);

  let app = match config.limits.request_timeout() {
    Some(timeout) => app.layer(TimeoutLayer::new(timeout)),
    None => app,
  };

  app
    .layer(
      ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.server.cors_origins)),
    )
    .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
  if origins.is_empty() || origins.iter().any(|o| o == "*") {
    CorsLayer::permissive()
  } else {
    let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
      .allow_origin(origins)
      .allow_methods(Any)
      .allow_headers(Any)
  }
}

/// Resolve the caller's role and attach it to the request
async fn auth_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
  match authenticate(&state.auth, req.headers()) {
    Ok(role) => {
      req.extensions_mut().insert(role);
      next.run(req).await
    }
    Err(e) => AppError::from(e).into_response(),
  }
}

async fn require_admin(req: Request, next: Next) -> Response {
  match req.extensions().get::<Role>() {
    Some(Role::Admin) => next.run(req).await,
    _ => AppError::Forbidden("Admin access required".into()).into_response(),
  }
}

/// Liveness check
async fn health_check() -> StatusCode {
  StatusCode::OK
}

/// Readiness check - returns 200 if the store is reachable
async fn readiness_check(State(state): State<AppState>) -> StatusCode {
  match state.resolver.store().ping().await {
    Ok(()) => StatusCode::OK,
    Err(e) => {
      tracing::warn!(error = %e, "readiness check failed");
      StatusCode::SERVICE_UNAVAILABLE
    }
  }
}

#[derive(Debug, Deserialize)]
struct UserBannerQuery {
  feature_id: Option<FeatureId>,
  tag_id: Option<TagId>,
  #[serde(default)]
  use_last_revision: bool,
}

async fn user_banner(
  State(state): State<AppState>,
  Extension(role): Extension<Role>,
  query: Result<Query<UserBannerQuery>, QueryRejection>,
) -> Result<Json<Content>, AppError> {
  let Query(query) = query?;
  let (Some(feature_id), Some(tag_id)) = (query.feature_id, query.tag_id) else {
    return Err(AppError::BadRequest(
      "feature_id and tag_id are required".into(),
    ));
  };

  let banner = state
    .resolver
    .resolve_for_user(feature_id, tag_id, query.use_last_revision)
    .await?;

  if !banner.is_active && role != Role::Admin {
    return Err(AppError::Forbidden("Banner is inactive".into()));
  }
  Ok(Json(banner.content))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
  feature_id: Option<FeatureId>,
  tag_id: Option<TagId>,
  limit: Option<usize>,
  offset: Option<usize>,
}

async fn list_banners(
  State(state): State<AppState>,
  query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Response, AppError> {
  let Query(query) = query?;
  let filter = BannerFilter {
    feature_id: query.feature_id,
    tag_id: query.tag_id,
    limit: query.limit,
    offset: query.offset,
  };
  let banners = state.resolver.list(&filter).await?;
  Ok(Json(banners).into_response())
}

#[derive(Debug, Deserialize)]
struct CreateBannerRequest {
  tag_ids: Vec<TagId>,
  feature_id: FeatureId,
  content: Content,
  is_active: bool,
}

async fn create_banner(
  State(state): State<AppState>,
  body: Result<Json<CreateBannerRequest>, JsonRejection>,
) -> Result<Response, AppError> {
  let Json(req) = body?;
  let id = state
    .resolver
    .create(NewBanner {
      tag_ids: req.tag_ids,
      feature_id: req.feature_id,
      content: req.content,
      is_active: req.is_active,
    })
    .await?;
  Ok(
    (
      StatusCode::CREATED,
      Json(serde_json::json!({ "banner_id": id })),
    )
      .into_response(),
  )
}

async fn update_banner(
  State(state): State<AppState>,
  id: Result<Path<BannerId>, PathRejection>,
  body: Result<Json<BannerPatch>, JsonRejection>,
) -> Result<StatusCode, AppError> {
  let Path(id) = id?;
  let Json(patch) = body?;
  state.resolver.update(id, &patch).await?;
  Ok(StatusCode::OK)
}

async fn delete_banner(
  State(state): State<AppState>,
  id: Result<Path<BannerId>, PathRejection>,
) -> Result<StatusCode, AppError> {
  let Path(id) = id?;
  state.resolver.delete_by_id(id).await?;
  Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug)]
enum AppError {
  BadRequest(String),
  Unauthorized(String),
  Forbidden(String),
  NotFound(String),
  Conflict(String),
  Internal,
}

impl From<BannerError> for AppError {
  fn from(e: BannerError) -> Self {
    match e {
      BannerError::NotFound => Self::NotFound(e.to_string()),
      BannerError::AlreadyExists => Self::Conflict(e.to_string()),
      BannerError::FeatureNotExists | BannerError::TagNotExists | BannerError::InvalidInput(_) => {
        Self::BadRequest(e.to_string())
      }
      BannerError::Store(ref source) => {
        tracing::error!(error = %source, "store operation failed");
        Self::Internal
      }
    }
  }
}

impl From<AuthError> for AppError {
  fn from(e: AuthError) -> Self {
    Self::Unauthorized(e.to_string())
  }
}

impl From<JsonRejection> for AppError {
  fn from(e: JsonRejection) -> Self {
    Self::BadRequest(e.body_text())
  }
}

impl From<QueryRejection> for AppError {
  fn from(e: QueryRejection) -> Self {
    Self::BadRequest(e.body_text())
  }
}

impl From<PathRejection> for AppError {
  fn from(e: PathRejection) -> Self {
    Self::BadRequest(e.body_text())
  }
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    let (status, msg) = match self {
      Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
      Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
      Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
      Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
      Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
      Self::Internal => (
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal server error".to_string(),
      ),
    };
    (status, Json(serde_json::json!({ "error": msg }))).into_response()
  }
}

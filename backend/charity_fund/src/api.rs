//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::errors::FundError;
use crate::models::{
    CharityProject, CharityProjectUpdate, ClosedProjectSpeed, Donation, NewCharityProject,
    NewDonation,
};
use crate::service::FundService;

pub struct ApiState {
    pub service: FundService,
    pub app_title: String,
}

/// Build the router with every endpoint mounted.
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/charity_project",
            get(list_projects).post(create_project),
        )
        .route(
            "/charity_project/:id",
            get(get_project)
                .patch(update_project)
                .delete(delete_project),
        )
        .route("/donation", get(list_donations).post(create_donation))
        .route("/reports/closing-speed", get(closing_speed_report))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub title: String,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReportResponse {
    pub count: usize,
    pub projects: Vec<ClosedProjectSpeed>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for FundError {
    fn into_response(self) -> Response {
        let status = match &self {
            FundError::MalformedPayload(_) | FundError::Validation(_) => StatusCode::BAD_REQUEST,
            FundError::NotFound(_) => StatusCode::NOT_FOUND,
            FundError::Conflict(_) => StatusCode::CONFLICT,
            FundError::Database(_)
            | FundError::Migrate(_)
            | FundError::Config(_)
            | FundError::InvariantViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<JsonRejection> for FundError {
    fn from(rejection: JsonRejection) -> Self {
        FundError::MalformedPayload(rejection.body_text())
    }
}

impl From<PathRejection> for FundError {
    fn from(rejection: PathRejection) -> Self {
        FundError::MalformedPayload(rejection.body_text())
    }
}

type ApiResult<T> = std::result::Result<T, FundError>;

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        title: state.app_title.clone(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /charity_project`
pub async fn list_projects(
    State(state): State<Arc<ApiState>>,
) -> ApiResult<Json<Vec<CharityProject>>> {
    Ok(Json(state.service.list_projects().await?))
}

/// `POST /charity_project`
///
/// Creates the project and immediately fills it from waiting donations.
pub async fn create_project(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<NewCharityProject>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CharityProject>)> {
    let Json(body) = body?;
    let project = state.service.create_project(body).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

/// `GET /charity_project/:id`
pub async fn get_project(
    State(state): State<Arc<ApiState>>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<CharityProject>> {
    let Path(id) = id?;
    Ok(Json(state.service.get_project(id).await?))
}

/// `PATCH /charity_project/:id`
pub async fn update_project(
    State(state): State<Arc<ApiState>>,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<CharityProjectUpdate>, JsonRejection>,
) -> ApiResult<Json<CharityProject>> {
    let Path(id) = id?;
    let Json(body) = body?;
    Ok(Json(state.service.update_project(id, body).await?))
}

/// `DELETE /charity_project/:id`
pub async fn delete_project(
    State(state): State<Arc<ApiState>>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<CharityProject>> {
    let Path(id) = id?;
    Ok(Json(state.service.delete_project(id).await?))
}

/// `GET /donation`
pub async fn list_donations(
    State(state): State<Arc<ApiState>>,
) -> ApiResult<Json<Vec<Donation>>> {
    Ok(Json(state.service.list_donations().await?))
}

/// `POST /donation`
///
/// Creates the donation and immediately spreads it over open projects.
pub async fn create_donation(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<NewDonation>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Donation>)> {
    let Json(body) = body?;
    let donation = state.service.create_donation(body).await?;
    Ok((StatusCode::CREATED, Json(donation)))
}

/// `GET /reports/closing-speed`
///
/// Closed projects, fastest-funded first.
pub async fn closing_speed_report(
    State(state): State<Arc<ApiState>>,
) -> ApiResult<Json<ReportResponse>> {
    let projects = state.service.closing_speed_report().await?;
    Ok(Json(ReportResponse {
        count: projects.len(),
        projects,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    use crate::db::tests::memory_pool;

    async fn app() -> Router {
        let state = Arc::new(ApiState {
            service: FundService::new(memory_pool().await),
            app_title: "Test fund".to_string(),
        });
        router(state)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_title() {
        let app = app().await;
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["title"], "Test fund");
    }

    #[tokio::test]
    async fn donation_is_allocated_on_creation() {
        let app = app().await;
        let (status, _) = send(
            &app,
            "POST",
            "/charity_project",
            Some(json!({ "name": "Shelter", "description": "Warm beds", "full_amount": 100 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, donation) = send(
            &app,
            "POST",
            "/donation",
            Some(json!({ "full_amount": 150, "comment": "for the cats" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(donation["invested_amount"], 100);
        assert_eq!(donation["fully_invested"], false);
        assert_eq!(donation["comment"], "for the cats");

        let (_, projects) = send(&app, "GET", "/charity_project", None).await;
        assert_eq!(projects[0]["fully_invested"], true);
        assert!(projects[0]["close_date"].is_i64());

        let (_, report) = send(&app, "GET", "/reports/closing-speed", None).await;
        assert_eq!(report["count"], 1);
        assert_eq!(report["projects"][0]["name"], "Shelter");
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let app = app().await;

        let (status, body) = send(&app, "POST", "/donation", Some(json!({ "full_amount": -5 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("positive"));

        let (status, _) = send(&app, "DELETE", "/charity_project/42", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        send(
            &app,
            "POST",
            "/charity_project",
            Some(json!({ "name": "Vet", "description": "Vet bills", "full_amount": 100 })),
        )
        .await;
        send(&app, "POST", "/donation", Some(json!({ "full_amount": 10 }))).await;
        let (status, _) = send(&app, "DELETE", "/charity_project/1", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            "PATCH",
            "/charity_project/1",
            Some(json!({ "full_amount": 10 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fully_invested"], true);

        let (status, body) = send(&app, "GET", "/charity_project/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["invested_amount"], 10);
    }

    #[tokio::test]
    async fn malformed_bodies_are_json_bad_requests() {
        let app = app().await;

        for payload in [
            json!({ "full_amount": "abc" }),
            json!({ "full_amount": 10, "bogus": 1 }),
            json!({}),
        ] {
            let (status, body) = send(&app, "POST", "/donation", Some(payload)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(body["error"]
                .as_str()
                .unwrap()
                .starts_with("Malformed payload"));
        }

        let (status, body) = send(
            &app,
            "POST",
            "/charity_project",
            Some(json!({ "name": "Vet", "full_amount": 100 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (_, donations) = send(&app, "GET", "/donation", None).await;
        assert_eq!(donations.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn non_numeric_project_id_is_json_bad_request() {
        let app = app().await;

        for method in ["GET", "DELETE"] {
            let (status, body) = send(&app, method, "/charity_project/abc", None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(body["error"]
                .as_str()
                .unwrap()
                .starts_with("Malformed payload"));
        }

        let (status, body) = send(
            &app,
            "PATCH",
            "/charity_project/abc",
            Some(json!({ "description": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }
}

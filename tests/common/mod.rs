//! In-process mock of the registry API, served with axum on a random port.

#![allow(dead_code)]

use axum::extract::{FromRequest, Multipart, Path, Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Access token whose payload is `{"exp":4102444800,"user_id":1}`.
pub const ACCESS_TOKEN: &str = "eyJhbGciOiJIUzI1NiJ9.eyJleHAiOjQxMDI0NDQ4MDAsInVzZXJfaWQiOjF9.sig";

/// One multipart part as the server saw it.
#[derive(Debug, Clone)]
pub struct SeenPart {
    pub name: String,
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
pub struct Mock {
    pub auth_headers: Mutex<Vec<Option<String>>>,
    pub element_queries: Mutex<Vec<Vec<(String, String)>>>,
    pub facet_queries: Mutex<Vec<Vec<(String, String)>>>,
    pub bodies: Mutex<Vec<Value>>,
    pub parts: Mutex<Vec<SeenPart>>,
    pub polls: Mutex<HashMap<String, usize>>,
    pub deleted: Mutex<Vec<(i64, i64)>>,
}

impl Mock {
    fn saw_auth(&self, headers: &HeaderMap) -> Option<String> {
        let value = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.auth_headers.lock().unwrap().push(value.clone());
        value
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        self.saw_auth(headers).as_deref() == Some(&format!("Bearer {}", ACCESS_TOKEN))
    }

    async fn record_parts(&self, mut multipart: Multipart) {
        while let Some(field) = multipart.next_field().await.unwrap() {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().map(str::to_string);
            let bytes = field.bytes().await.unwrap().to_vec();
            self.parts.lock().unwrap().push(SeenPart {
                name,
                file_name,
                bytes,
            });
        }
    }

    pub fn part(&self, name: &str) -> Option<SeenPart> {
        self.parts
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.name == name)
            .cloned()
    }
}

pub fn acetone() -> Value {
    json!({
        "id": 7,
        "primary_name_ru": "Ацетон",
        "cas_number": "67-64-1",
        "status": "PUBLISHED",
        "updated_at": "2025-01-10T08:00:00Z",
        "sec1_identification": {"molecular_formula": "C3H6O"},
        "sec2_physical": {"appearance": "LIQUID", "boiling_point": "56"},
        "sec11_class": {"sanpin_class": "4"}
    })
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"detail": "Given token not valid for any token type"})),
    )
        .into_response()
}

async fn token(Json(body): Json<Value>) -> Response {
    if body["password"] == "secret" {
        Json(json!({"access": ACCESS_TOKEN, "refresh": "refresh-token"})).into_response()
    } else {
        unauthorized()
    }
}

async fn register(State(mock): State<Arc<Mock>>, Json(body): Json<Value>) -> Response {
    mock.bodies.lock().unwrap().push(body.clone());
    (StatusCode::CREATED, Json(json!({"id": 3, "username": body["username"]}))).into_response()
}

fn profile_body() -> Value {
    json!({
        "id": 1,
        "username": "operator",
        "email": "op@example.com",
        "role": "company_admin",
        "company": {
            "company_name": "ChemCo",
            "inn": "7701234567",
            "address": "Tashkent",
            "phone": "",
            "is_manufacturer": true,
            "is_importer": false,
            "is_exporter": true,
            "logo": null
        }
    })
}

async fn me(State(mock): State<Arc<Mock>>, headers: HeaderMap) -> Response {
    if !mock.authorized(&headers) {
        return unauthorized();
    }
    Json(profile_body()).into_response()
}

async fn update_me(
    State(mock): State<Arc<Mock>>,
    headers: HeaderMap,
    request: Request,
) -> Response {
    if !mock.authorized(&headers) {
        return unauthorized();
    }
    let is_multipart = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("multipart/"))
        .unwrap_or(false);
    if is_multipart {
        let multipart = Multipart::from_request(request, &()).await.unwrap();
        mock.record_parts(multipart).await;
    } else {
        let bytes = axum::body::to_bytes(request.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        mock.bodies.lock().unwrap().push(body);
    }
    Json(profile_body()).into_response()
}

async fn list_elements(
    State(mock): State<Arc<Mock>>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Json<Value> {
    mock.saw_auth(&headers);
    mock.element_queries.lock().unwrap().push(params);
    Json(json!({"count": 1, "next": null, "previous": null, "results": [acetone()]}))
}

async fn suggest(Query(params): Query<Vec<(String, String)>>) -> Json<Value> {
    let search = params
        .iter()
        .find(|(k, _)| k == "search")
        .map(|(_, v)| v.clone())
        .unwrap_or_default();
    Json(json!([{"id": 7, "primary_name_ru": format!("{} (match)", search), "cas_number": "67-64-1"}]))
}

async fn facets(
    State(mock): State<Arc<Mock>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Json<Value> {
    mock.facet_queries.lock().unwrap().push(params);
    Json(json!({
        "sanpin_class": {
            "title": "Hazard class",
            "options": [
                {"value": "1", "label": "Class 1", "count": 2},
                {"value": "4", "label": "Class 4", "count": 9}
            ]
        },
        "is_pops": {
            "title": "Persistent organic pollutant",
            "options": [{"value": true, "label": "Yes", "count": 1}]
        }
    }))
}

async fn columns() -> Json<Value> {
    Json(json!([
        {"field": "cas_number", "headerName": "CAS", "minWidth": 120},
        {"field": "primary_name_ru", "headerName": "Name", "minWidth": 250},
        {"field": "sanpin_class", "headerName": "Class"}
    ]))
}

async fn element(Path(id): Path<i64>) -> Response {
    if id == 7 {
        Json(acetone()).into_response()
    } else {
        (StatusCode::NOT_FOUND, Json(json!({"detail": "Not found."}))).into_response()
    }
}

fn validate_and_echo(mock: &Mock, id: i64, body: Value) -> Response {
    mock.bodies.lock().unwrap().push(body.clone());
    let name = body["primary_name_ru"].as_str().unwrap_or_default();
    if name.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "primary_name_ru": ["This field may not be blank."],
                "sec2_physical": {"ph": ["A valid number is required."]}
            })),
        )
            .into_response();
    }
    let mut saved = body;
    saved["id"] = json!(id);
    (StatusCode::OK, Json(saved)).into_response()
}

async fn create_element(State(mock): State<Arc<Mock>>, Json(body): Json<Value>) -> Response {
    validate_and_echo(&mock, 12, body)
}

async fn update_element(
    State(mock): State<Arc<Mock>>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Response {
    validate_and_echo(&mock, id, body)
}

async fn upload_import(State(mock): State<Arc<Mock>>, multipart: Multipart) -> Json<Value> {
    mock.record_parts(multipart).await;
    Json(json!({"task_id": "t1"}))
}

async fn task(State(mock): State<Arc<Mock>>, Path(task_id): Path<String>) -> Json<Value> {
    let n = {
        let mut polls = mock.polls.lock().unwrap();
        let n = polls.entry(task_id).or_insert(0);
        *n += 1;
        *n
    };
    if n == 1 {
        Json(json!({"status": "PROGRESS", "result": null}))
    } else {
        Json(json!({"status": "DONE", "result": {"imported": 12, "errors": []}}))
    }
}

async fn template() -> Response {
    (
        [
            (
                header::CONTENT_TYPE,
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            ),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"registry_template.xlsx\"",
            ),
        ],
        b"PK\x03\x04template".to_vec(),
    )
        .into_response()
}

async fn passport(Path(id): Path<i64>) -> Response {
    (
        [(header::CONTENT_TYPE, "application/pdf")],
        format!("%PDF-1.4 passport {}", id).into_bytes(),
    )
        .into_response()
}

async fn upload_attachment(
    State(mock): State<Arc<Mock>>,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> Json<Value> {
    mock.record_parts(multipart).await;
    let doc_type = mock
        .part("doc_type")
        .map(|p| String::from_utf8_lossy(&p.bytes).to_string())
        .unwrap_or_default();
    Json(json!({
        "id": 40 + id,
        "file": "/media/attachments/cert.pdf",
        "description": "certificate",
        "doc_type": doc_type,
        "uploaded_at": "2025-01-11T09:00:00Z"
    }))
}

async fn delete_attachment(
    State(mock): State<Arc<Mock>>,
    Path((id, att)): Path<(i64, i64)>,
) -> StatusCode {
    mock.deleted.lock().unwrap().push((id, att));
    StatusCode::NO_CONTENT
}

async fn upload_structure(
    State(mock): State<Arc<Mock>>,
    Path(_id): Path<i64>,
    multipart: Multipart,
) -> Json<Value> {
    mock.record_parts(multipart).await;
    Json(acetone())
}

async fn stats() -> Json<Value> {
    Json(json!({
        "total_elements": 20,
        "hazard_distribution": [
            {"sec11_class__sanpin_class": "4", "count": 9},
            {"sec11_class__sanpin_class": "1", "count": 2},
            {"sec11_class__sanpin_class": "NC", "count": 9}
        ]
    }))
}

async fn ticket(State(mock): State<Arc<Mock>>, multipart: Multipart) -> Response {
    mock.record_parts(multipart).await;
    (StatusCode::CREATED, Json(json!({"id": 1, "status": "NEW"}))).into_response()
}

pub fn router(mock: Arc<Mock>) -> Router {
    Router::new()
        .route("/api/token/", post(token))
        .route("/api/auth/register/", post(register))
        .route("/api/auth/me/", get(me).patch(update_me))
        .route(
            "/api/registry/elements/",
            get(list_elements).post(create_element),
        )
        .route("/api/registry/elements/suggest/", get(suggest))
        .route("/api/registry/elements/facets/", get(facets))
        .route("/api/registry/config/", get(columns))
        .route(
            "/api/registry/elements/{id}/",
            get(element).patch(update_element),
        )
        .route("/api/registry/elements/{id}/pdf/", get(passport))
        .route(
            "/api/registry/elements/{id}/upload_attachment/",
            post(upload_attachment),
        )
        .route(
            "/api/registry/elements/{id}/delete_attachment/{att}/",
            delete(delete_attachment),
        )
        .route(
            "/api/registry/elements/{id}/upload_structure/",
            post(upload_structure),
        )
        .route("/api/registry/import/upload/", post(upload_import))
        .route("/api/registry/import/template/", get(template))
        .route("/api/registry/tasks/{task_id}/", get(task))
        .route("/api/registry/stats/", get(stats))
        .route("/api/support/tickets/", post(ticket))
        .with_state(mock)
}

/// Serve the mock on a random local port. Returns the API base URL.
pub async fn spawn() -> (String, Arc<Mock>) {
    let mock = Arc::new(Mock::default());
    let app = router(mock.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/api", addr), mock)
}

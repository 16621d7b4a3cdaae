//! In-process stand-in for the task service, used by tests.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::types::{PageMeta, Priority, Todo, TodoStatus, User};
use crate::config::ApiConfig;
use crate::session::token::make_token;

pub const PASSWORD: &str = "secret";
pub const USER_ID: &str = "user-a";
pub const REFRESH_TOKEN: &str = "refresh-1";

#[derive(Default)]
struct FakeState {
  todos: Vec<Todo>,
  next_id: u32,
  access_token: String,
  calls: HashMap<String, u32>,
  failures: HashMap<String, (u16, u32)>,
  delays: HashMap<String, Duration>,
  last_authorization: Option<String>,
  last_body: Option<Value>,
}

type Shared = Arc<Mutex<FakeState>>;

/// Fake task service bound to an ephemeral local port.
#[derive(Clone)]
pub struct FakeApi {
  url: String,
  state: Shared,
}

pub fn user() -> User {
  User {
    id: USER_ID.to_string(),
    email: "a@example.com".to_string(),
    name: "Ada".to_string(),
    image: None,
    email_verified: true,
    is_active: true,
    last_login_at: None,
    created_at: "2024-01-01T00:00:00Z".to_string(),
    updated_at: "2024-01-01T00:00:00Z".to_string(),
  }
}

pub fn todo(id: &str, owner: Option<&str>, status: TodoStatus) -> Todo {
  Todo {
    id: id.to_string(),
    name: format!("task {}", id),
    description: None,
    start: None,
    end: None,
    duration: None,
    priority: Priority::Medium,
    status,
    archived: false,
    is_default: None,
    parent_id: None,
    children: None,
    owner: owner.map(String::from),
    tags: None,
    completed_at: None,
    created_at: None,
    updated_at: None,
  }
}

impl FakeApi {
  pub async fn start() -> Self {
    let state: Shared = Arc::new(Mutex::new(FakeState {
      access_token: make_token(USER_ID, Utc::now().timestamp() + 3600),
      next_id: 1,
      ..FakeState::default()
    }));

    let app = Router::new()
      .route("/auth/login", post(login))
      .route("/auth/register", post(register))
      .route("/auth/me", get(me))
      .route("/auth/refresh", post(refresh))
      .route("/auth/logout", post(logout))
      .route("/tasks", get(list_tasks).post(create_task))
      .route(
        "/tasks/:id",
        get(get_task).patch(update_task).delete(delete_task),
      )
      .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
      .await
      .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move { axum::serve(listener, app).await.expect("serve fake api") });

    Self {
      url: format!("http://{}", addr),
      state,
    }
  }

  pub fn config(&self) -> ApiConfig {
    ApiConfig {
      url: self.url.clone(),
      ..ApiConfig::default()
    }
  }

  pub fn access_token(&self) -> String {
    self.state.lock().unwrap().access_token.clone()
  }

  pub fn add_todo(&self, todo: Todo) {
    self.state.lock().unwrap().todos.push(todo);
  }

  pub fn calls(&self, route: &str) -> u32 {
    self.state.lock().unwrap().calls.get(route).copied().unwrap_or(0)
  }

  /// Answer the next `times` requests to `route` with `status`.
  pub fn fail_next(&self, route: &str, status: u16, times: u32) {
    self
      .state
      .lock()
      .unwrap()
      .failures
      .insert(route.to_string(), (status, times));
  }

  /// Delay the next request to `route`.
  pub fn delay_next(&self, route: &str, delay: Duration) {
    self
      .state
      .lock()
      .unwrap()
      .delays
      .insert(route.to_string(), delay);
  }

  pub fn last_authorization(&self) -> Option<String> {
    self.state.lock().unwrap().last_authorization.clone()
  }

  pub fn last_body(&self) -> Option<Value> {
    self.state.lock().unwrap().last_body.clone()
  }
}

/// Count the call, record headers, and apply any scripted delay or failure.
async fn enter(state: &Shared, route: &str, headers: &HeaderMap) -> Option<Response> {
  let delay = {
    let mut s = state.lock().unwrap();
    *s.calls.entry(route.to_string()).or_default() += 1;
    s.last_authorization = headers
      .get("authorization")
      .and_then(|v| v.to_str().ok())
      .map(String::from);
    s.delays.remove(route)
  };
  if let Some(delay) = delay {
    tokio::time::sleep(delay).await;
  }

  let mut s = state.lock().unwrap();
  let failure = s.failures.get_mut(route).map(|(status, remaining)| {
    *remaining -= 1;
    (*status, *remaining)
  });
  if let Some((status, remaining)) = failure {
    if remaining == 0 {
      s.failures.remove(route);
    }
    let code = StatusCode::from_u16(status).expect("status code");
    return Some((code, Json(json!({"message": "forced failure"}))).into_response());
  }
  None
}

fn authorized(state: &Shared, headers: &HeaderMap) -> bool {
  let expected = format!("Bearer {}", state.lock().unwrap().access_token);
  headers
    .get("authorization")
    .and_then(|v| v.to_str().ok())
    .map(|v| v == expected)
    .unwrap_or(false)
}

fn unauthorized() -> Response {
  (
    StatusCode::UNAUTHORIZED,
    Json(json!({"message": "Unauthorized"})),
  )
    .into_response()
}

fn auth_response(state: &Shared, user: User) -> Response {
  let token = state.lock().unwrap().access_token.clone();
  Json(json!({"user": user, "token": token, "refreshToken": REFRESH_TOKEN})).into_response()
}

async fn login(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
  if let Some(r) = enter(&state, "login", &headers).await {
    return r;
  }
  if body["password"] != PASSWORD {
    return (
      StatusCode::UNAUTHORIZED,
      Json(json!({"message": "Invalid credentials"})),
    )
      .into_response();
  }
  auth_response(&state, user())
}

async fn register(
  State(state): State<Shared>,
  headers: HeaderMap,
  Json(body): Json<Value>,
) -> Response {
  if let Some(r) = enter(&state, "register", &headers).await {
    return r;
  }
  if body["email"].as_str().unwrap_or("").is_empty() {
    return (
      StatusCode::UNPROCESSABLE_ENTITY,
      Json(json!({"message": "email is required"})),
    )
      .into_response();
  }
  let mut user = user();
  user.email = body["email"].as_str().unwrap_or_default().to_string();
  user.name = body["name"].as_str().unwrap_or_default().to_string();
  auth_response(&state, user)
}

async fn me(State(state): State<Shared>, headers: HeaderMap) -> Response {
  if let Some(r) = enter(&state, "me", &headers).await {
    return r;
  }
  if !authorized(&state, &headers) {
    return unauthorized();
  }
  Json(user()).into_response()
}

async fn refresh(
  State(state): State<Shared>,
  headers: HeaderMap,
  Json(body): Json<Value>,
) -> Response {
  if let Some(r) = enter(&state, "refresh", &headers).await {
    return r;
  }
  if body["refreshToken"] != REFRESH_TOKEN {
    return unauthorized();
  }
  state.lock().unwrap().access_token = make_token(USER_ID, Utc::now().timestamp() + 7200);
  auth_response(&state, user())
}

async fn logout(State(state): State<Shared>, headers: HeaderMap) -> Response {
  if let Some(r) = enter(&state, "logout", &headers).await {
    return r;
  }
  Json(json!({"message": "Logged out"})).into_response()
}

async fn list_tasks(
  State(state): State<Shared>,
  headers: HeaderMap,
  Query(params): Query<HashMap<String, String>>,
) -> Response {
  if let Some(r) = enter(&state, "list_tasks", &headers).await {
    return r;
  }
  let page: u32 = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
  let limit: u32 = params.get("limit").and_then(|p| p.parse().ok()).unwrap_or(10);
  let search = params.get("search").map(|s| s.to_lowercase());
  let status = params.get("status").cloned();

  let s = state.lock().unwrap();
  let matching: Vec<&Todo> = s
    .todos
    .iter()
    .filter(|t| search.as_ref().map_or(true, |q| t.name.to_lowercase().contains(q)))
    .filter(|t| status.as_ref().map_or(true, |st| t.status.as_str() == st))
    .collect();
  let data: Vec<&Todo> = matching
    .iter()
    .skip(((page.max(1) - 1) * limit) as usize)
    .take(limit as usize)
    .copied()
    .collect();
  let meta = PageMeta::for_total(matching.len() as u64, page, limit);
  Json(json!({"data": data, "meta": meta})).into_response()
}

async fn get_task(State(state): State<Shared>, headers: HeaderMap, Path(id): Path<String>) -> Response {
  if let Some(r) = enter(&state, "get_task", &headers).await {
    return r;
  }
  let s = state.lock().unwrap();
  match s.todos.iter().find(|t| t.id == id) {
    Some(todo) => Json(todo).into_response(),
    None => (
      StatusCode::NOT_FOUND,
      Json(json!({"message": "task not found"})),
    )
      .into_response(),
  }
}

async fn create_task(
  State(state): State<Shared>,
  headers: HeaderMap,
  Json(body): Json<Value>,
) -> Response {
  if let Some(r) = enter(&state, "create_task", &headers).await {
    return r;
  }
  let mut s = state.lock().unwrap();
  s.last_body = Some(body.clone());
  let id = format!("t{}", s.next_id);
  s.next_id += 1;
  let mut todo = todo(&id, Some(USER_ID), TodoStatus::Todo);
  todo.name = body["name"].as_str().unwrap_or_default().to_string();
  s.todos.push(todo.clone());
  (StatusCode::CREATED, Json(todo)).into_response()
}

async fn update_task(
  State(state): State<Shared>,
  headers: HeaderMap,
  Path(id): Path<String>,
  Json(body): Json<Value>,
) -> Response {
  if let Some(r) = enter(&state, "update_task", &headers).await {
    return r;
  }
  let mut s = state.lock().unwrap();
  s.last_body = Some(body.clone());
  let Some(todo) = s.todos.iter_mut().find(|t| t.id == id) else {
    return (
      StatusCode::NOT_FOUND,
      Json(json!({"message": "task not found"})),
    )
      .into_response();
  };
  if let Some(status) = body.get("status") {
    todo.status = serde_json::from_value(status.clone()).expect("status");
  }
  if let Some(name) = body.get("name").and_then(|v| v.as_str()) {
    todo.name = name.to_string();
  }
  Json(todo.clone()).into_response()
}

async fn delete_task(
  State(state): State<Shared>,
  headers: HeaderMap,
  Path(id): Path<String>,
) -> Response {
  if let Some(r) = enter(&state, "delete_task", &headers).await {
    return r;
  }
  let mut s = state.lock().unwrap();
  let before = s.todos.len();
  s.todos.retain(|t| t.id != id);
  if s.todos.len() == before {
    return (
      StatusCode::NOT_FOUND,
      Json(json!({"message": "task not found"})),
    )
      .into_response();
  }
  StatusCode::NO_CONTENT.into_response()
}

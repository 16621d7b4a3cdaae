//! Types exchanged with the task service.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::cache::Cacheable;

// ============================================================================
// Auth
// ============================================================================

/// Authenticated account, read-only on the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
  pub id: String,
  pub email: String,
  pub name: String,
  #[serde(default)]
  pub image: Option<String>,
  #[serde(default)]
  pub email_verified: bool,
  #[serde(default)]
  pub is_active: bool,
  #[serde(default)]
  pub last_login_at: Option<String>,
  #[serde(default)]
  pub created_at: String,
  #[serde(default)]
  pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
  pub email: String,
  pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
  pub email: String,
  pub name: String,
  pub password: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
  pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
  pub user: User,
  pub token: String,
  pub refresh_token: String,
}

// ============================================================================
// Todos
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
  #[default]
  Low,
  Medium,
  High,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TodoStatus {
  #[default]
  Todo,
  InProgress,
  Completed,
}

impl TodoStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      TodoStatus::Todo => "TODO",
      TodoStatus::InProgress => "IN_PROGRESS",
      TodoStatus::Completed => "COMPLETED",
    }
  }

  /// Status after a toggle: completed goes back to TODO, anything else
  /// becomes COMPLETED.
  pub fn toggled(self) -> Self {
    match self {
      TodoStatus::Completed => TodoStatus::Todo,
      TodoStatus::Todo | TodoStatus::InProgress => TodoStatus::Completed,
    }
  }
}

impl fmt::Display for TodoStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TodoStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().replace('-', "_").as_str() {
      "todo" => Ok(TodoStatus::Todo),
      "in_progress" => Ok(TodoStatus::InProgress),
      "completed" | "done" => Ok(TodoStatus::Completed),
      other => Err(format!("unknown status '{}'", other)),
    }
  }
}

impl fmt::Display for Priority {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Priority::Low => "LOW",
      Priority::Medium => "MEDIUM",
      Priority::High => "HIGH",
    })
  }
}

impl FromStr for Priority {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "low" => Ok(Priority::Low),
      "medium" => Ok(Priority::Medium),
      "high" => Ok(Priority::High),
      other => Err(format!("unknown priority '{}'", other)),
    }
  }
}

/// A task as stored by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub start: Option<String>,
  #[serde(default)]
  pub end: Option<String>,
  #[serde(default)]
  pub duration: Option<i64>,
  #[serde(default)]
  pub priority: Priority,
  #[serde(default)]
  pub status: TodoStatus,
  #[serde(default)]
  pub archived: bool,
  #[serde(default)]
  pub is_default: Option<bool>,
  #[serde(default)]
  pub parent_id: Option<String>,
  #[serde(default)]
  pub children: Option<String>,
  #[serde(default)]
  pub owner: Option<String>,
  #[serde(default)]
  pub tags: Option<Vec<String>>,
  #[serde(default)]
  pub completed_at: Option<String>,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub updated_at: Option<String>,
}

impl Cacheable for Todo {
  fn entity_type() -> &'static str {
    "todo"
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTodo {
  pub name: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub start: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub end: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub duration: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub priority: Option<Priority>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<TodoStatus>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub parent_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tags: Option<Vec<String>>,
}

/// Partial update; only set fields are sent
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTodo {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub start: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub end: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub duration: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub priority: Option<Priority>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<TodoStatus>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub archived: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub parent_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tags: Option<Vec<String>>,
}

impl UpdateTodo {
  pub fn status(status: TodoStatus) -> Self {
    Self {
      status: Some(status),
      ..Self::default()
    }
  }

  pub fn is_empty(&self) -> bool {
    *self == Self::default()
  }
}

// ============================================================================
// Listing
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
  pub total: u64,
  pub page: u32,
  pub limit: u32,
  pub total_pages: u64,
  #[serde(default)]
  pub has_next_page: bool,
  #[serde(default)]
  pub has_previous_page: bool,
}

impl PageMeta {
  /// Metadata for `total` items shown `limit` per page, positioned at `page`.
  pub fn for_total(total: u64, page: u32, limit: u32) -> Self {
    let total_pages = if limit == 0 {
      0
    } else {
      total.div_ceil(limit as u64)
    };
    Self {
      total,
      page,
      limit,
      total_pages,
      has_next_page: (page as u64) < total_pages,
      has_previous_page: page > 1,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
  pub data: Vec<T>,
  pub meta: PageMeta,
}

/// Status filter for list queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusFilter {
  #[default]
  All,
  Only(TodoStatus),
}

impl StatusFilter {
  pub fn status(&self) -> Option<TodoStatus> {
    match self {
      StatusFilter::All => None,
      StatusFilter::Only(s) => Some(*s),
    }
  }
}

impl FromStr for StatusFilter {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if s.eq_ignore_ascii_case("all") {
      return Ok(StatusFilter::All);
    }
    s.parse().map(StatusFilter::Only)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoFilters {
  pub search: Option<String>,
  pub status: StatusFilter,
}

impl TodoFilters {
  /// Search text with surrounding whitespace removed; blank means no search.
  pub fn search_term(&self) -> Option<&str> {
    self
      .search
      .as_deref()
      .map(str::trim)
      .filter(|s| !s.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_todo_from_server_json() {
    let todo: Todo = serde_json::from_value(json!({
      "id": "t1",
      "name": "Write docs",
      "description": null,
      "priority": "HIGH",
      "status": "IN_PROGRESS",
      "archived": false,
      "owner": "u1",
      "tags": ["docs"],
      "createdAt": "2024-01-01T00:00:00Z"
    }))
    .unwrap();

    assert_eq!(todo.priority, Priority::High);
    assert_eq!(todo.status, TodoStatus::InProgress);
    assert_eq!(todo.owner.as_deref(), Some("u1"));
    assert_eq!(Todo::detail_key(&todo.id).to_string(), "todo/t1");
  }

  #[test]
  fn test_update_only_sends_set_fields() {
    let body = serde_json::to_value(UpdateTodo::status(TodoStatus::Completed)).unwrap();
    assert_eq!(body, json!({"status": "COMPLETED"}));
    assert!(UpdateTodo::default().is_empty());
  }

  #[test]
  fn test_toggle_never_targets_in_progress() {
    assert_eq!(TodoStatus::Todo.toggled(), TodoStatus::Completed);
    assert_eq!(TodoStatus::InProgress.toggled(), TodoStatus::Completed);
    assert_eq!(TodoStatus::Completed.toggled(), TodoStatus::Todo);
  }

  #[test]
  fn test_page_meta() {
    let meta = PageMeta::for_total(21, 2, 10);
    assert_eq!(meta.total_pages, 3);
    assert!(meta.has_next_page);
    assert!(meta.has_previous_page);

    let empty = PageMeta::for_total(0, 1, 10);
    assert_eq!(empty.total_pages, 0);
    assert!(!empty.has_next_page);
  }

  #[test]
  fn test_parse_filters() {
    assert_eq!("all".parse::<StatusFilter>(), Ok(StatusFilter::All));
    assert_eq!(
      "in-progress".parse::<StatusFilter>(),
      Ok(StatusFilter::Only(TodoStatus::InProgress))
    );
    assert!("later".parse::<StatusFilter>().is_err());
  }
}

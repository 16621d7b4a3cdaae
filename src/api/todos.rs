//! Todo reads through the cache, and the mutation coordinator.

use tracing::debug;

use crate::cache::{Cache, CacheResult, QueryKey};
use crate::error::{Error, Result};

use super::auth::AuthManager;
use super::client::HttpClient;
use super::keys::{self, TodoQueryKey};
use super::types::{CreateTodo, PageMeta, Paginated, Todo, TodoFilters, TodoStatus, UpdateTodo};

const TASKS: &str = "tasks";

/// Todo operations with transparent caching.
///
/// Reads go through the cache; every write is a single request and, once it
/// succeeds, invalidates the entries it affected. Failed writes are returned
/// as-is and leave the cache alone.
#[derive(Clone)]
pub struct TodoService {
  http: HttpClient,
  auth: AuthManager,
  cache: Cache,
  page_size: u32,
}

impl TodoService {
  pub fn new(http: HttpClient, auth: AuthManager, cache: Cache, page_size: u32) -> Self {
    Self {
      http,
      auth,
      cache,
      page_size,
    }
  }

  /// One page of todos visible to the signed-in user.
  ///
  /// The cache holds the server's page as returned; the owner filter is
  /// applied to each read.
  pub async fn list(&self, page: u32, filters: &TodoFilters) -> Result<CacheResult<Paginated<Todo>>> {
    let page = page.max(1);
    let user_id = self.acting_user_id().await?;
    let key = TodoQueryKey::List {
      page,
      limit: self.page_size,
      filters,
      user_id: user_id.as_deref(),
    }
    .key();

    let params = list_params(page, self.page_size, filters);
    let http = self.http.clone();
    let result = self
      .cache
      .read(&key, move || async move {
        http.get::<Paginated<Todo>>(&[TASKS], &params).await
      })
      .await;

    let result = self.auth.guard(result)?;
    Ok(result.map(|raw| scope_to_owner(raw, user_id.as_deref())))
  }

  /// A single todo by id.
  pub async fn get(&self, id: &str) -> Result<CacheResult<Todo>> {
    check_id(id)?;
    let http = self.http.clone();
    let owned_id = id.to_string();
    let result = self
      .cache
      .read(&TodoQueryKey::Detail { id }.key(), move || async move {
        http.get::<Todo>(&[TASKS, owned_id.as_str()], &[]).await
      })
      .await;

    self.auth.guard(result)
  }

  pub async fn create(&self, todo: &CreateTodo) -> Result<Todo> {
    let created: Todo = self.auth.guard(self.http.post(&[TASKS], todo).await)?;
    debug!(id = %created.id, "todo created");
    self.invalidate(&[keys::all_lists()])?;
    Ok(created)
  }

  pub async fn update(&self, id: &str, patch: &UpdateTodo) -> Result<Todo> {
    check_id(id)?;
    let updated: Todo = self
      .auth
      .guard(self.http.patch(&[TASKS, id], patch).await)?;
    debug!(id, "todo updated");
    self.invalidate(&[keys::all_lists(), keys::detail(id)])?;
    Ok(updated)
  }

  pub async fn delete(&self, id: &str) -> Result<()> {
    check_id(id)?;
    self.auth.guard(self.http.delete(&[TASKS, id]).await)?;
    debug!(id, "todo deleted");
    self.invalidate(&[keys::all_lists(), keys::detail(id)])?;
    Ok(())
  }

  /// Flip between TODO and COMPLETED. An in-progress todo is completed.
  pub async fn toggle_status(&self, id: &str, current: TodoStatus) -> Result<Todo> {
    self.update(id, &UpdateTodo::status(current.toggled())).await
  }

  fn invalidate(&self, prefixes: &[QueryKey]) -> Result<()> {
    for prefix in prefixes {
      self.cache.invalidate(prefix)?;
    }
    Ok(())
  }

  async fn acting_user_id(&self) -> Result<Option<String>> {
    match self.auth.current_user().await {
      Ok(user) => Ok(Some(user.id)),
      Err(Error::NoSession) => Ok(None),
      Err(e) => Err(e),
    }
  }
}

/// Reject ids that would not address a single `/tasks/{id}` resource.
fn check_id(id: &str) -> Result<()> {
  match id.trim() {
    "" | "." | ".." => Err(Error::InvalidId(id.to_string())),
    _ => Ok(()),
  }
}

fn list_params(page: u32, limit: u32, filters: &TodoFilters) -> Vec<(&'static str, String)> {
  let mut params = vec![("page", page.to_string()), ("limit", limit.to_string())];
  if let Some(search) = filters.search_term() {
    params.push(("search", search.to_string()));
  }
  if let Some(status) = filters.status.status() {
    params.push(("status", status.as_str().to_string()));
  }
  params
}

/// Keep only todos owned by `user_id` or by nobody, and recompute the page
/// metadata for what is left.
pub fn scope_to_owner(page: Paginated<Todo>, user_id: Option<&str>) -> Paginated<Todo> {
  let data: Vec<Todo> = page
    .data
    .into_iter()
    .filter(|todo| match todo.owner.as_deref() {
      None => true,
      Some(owner) => Some(owner) == user_id,
    })
    .collect();

  let meta = PageMeta::for_total(data.len() as u64, page.meta.page, page.meta.limit);
  Paginated { data, meta }
}

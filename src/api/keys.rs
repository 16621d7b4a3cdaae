//! Cache keys for task service queries.

use crate::cache::{Cacheable, QueryKey};

use super::types::{Todo, TodoFilters};

const TODOS_ROOT: &str = "todos";
const USER_ROOT: &str = "user";

/// Query key types for todo reads.
#[derive(Clone, Debug)]
pub enum TodoQueryKey<'a> {
  /// A page of the todo list
  List {
    page: u32,
    limit: u32,
    filters: &'a TodoFilters,
    /// The user the list is being read for
    user_id: Option<&'a str>,
  },
  /// A single todo by id
  Detail { id: &'a str },
}

impl TodoQueryKey<'_> {
  pub fn key(&self) -> QueryKey {
    match self {
      Self::List {
        page,
        limit,
        filters,
        user_id,
      } => QueryKey::new(TODOS_ROOT)
        .with(page)
        .with(limit)
        .with_opt(filters.search_term())
        .with_opt(filters.status.status())
        .with_opt(*user_id),
      Self::Detail { id } => Todo::detail_key(id),
    }
  }
}

/// Prefix covering every list page, whatever its filters.
pub fn all_lists() -> QueryKey {
  QueryKey::new(TODOS_ROOT)
}

pub fn detail(id: &str) -> QueryKey {
  Todo::detail_key(id)
}

/// Prefix covering every todo detail entry.
pub fn detail_root() -> QueryKey {
  QueryKey::new(Todo::entity_type())
}

pub fn current_user() -> QueryKey {
  QueryKey::new(USER_ROOT)
}

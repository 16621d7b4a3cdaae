//! Task service API: HTTP transport, auth session and todo operations.

pub mod auth;
pub mod client;
pub mod keys;
pub mod todos;
pub mod types;

pub use auth::AuthManager;
pub use client::HttpClient;
pub use todos::TodoService;

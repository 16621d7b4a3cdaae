/// Command-line subcommands and their execution against a [`TodoClient`]
use clap::Subcommand;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use crate::api::types::{
  CreateTodo, Paginated, Priority, RegisterRequest, StatusFilter, Todo, TodoFilters, TodoStatus,
  UpdateTodo, User,
};
use crate::cache::{CacheResult, CacheSource};
use crate::client::TodoClient;
use crate::error::{Error, Result};
use crate::event::LiveEvent;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Sign in (password is read from TODOQ_PASSWORD)
  Login {
    #[arg(long)]
    email: String,
  },
  /// Create an account and sign into it
  Register {
    #[arg(long)]
    email: String,
    #[arg(long)]
    name: String,
    #[arg(long)]
    image: Option<String>,
  },
  /// End the session
  Logout,
  /// Show the signed-in user
  Whoami,
  /// Exchange the refresh token for a new session
  Refresh,
  /// List todos
  #[command(alias = "ls")]
  List {
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long)]
    search: Option<String>,
    /// all, todo, in_progress or completed
    #[arg(long, default_value = "all")]
    status: StatusFilter,
  },
  /// Show one todo
  Show { id: String },
  /// Create a todo
  Add {
    name: String,
    #[arg(long)]
    description: Option<String>,
    /// low, medium or high
    #[arg(long)]
    priority: Option<Priority>,
    /// Comma-separated tags
    #[arg(long, value_delimiter = ',')]
    tags: Option<Vec<String>>,
  },
  /// Change fields of a todo
  Edit {
    id: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    priority: Option<Priority>,
    #[arg(long)]
    status: Option<TodoStatus>,
    #[arg(long)]
    archived: Option<bool>,
  },
  /// Delete a todo
  #[command(alias = "delete")]
  Rm { id: String },
  /// Flip a todo between TODO and COMPLETED
  Toggle { id: String },
  /// Apply change notifications read from stdin, one JSON object per line
  Listen,
  /// Manage the local query cache
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
  /// Drop every cached response
  Clear,
}

impl Command {
  /// Whether the command needs a password from the environment.
  pub fn needs_password(&self) -> bool {
    matches!(self, Command::Login { .. } | Command::Register { .. })
  }
}

/// Run `command`, printing its result to stdout.
pub async fn execute(client: &TodoClient, command: Command, password: Option<String>) -> Result<()> {
  match command {
    Command::Login { email } => {
      let password = password.ok_or_else(|| Error::Internal("no password provided".to_string()))?;
      let user = client.auth.login(&email, &password).await?;
      println!("Logged in as {}", format_user(&user));
    }
    Command::Register { email, name, image } => {
      let password = password.ok_or_else(|| Error::Internal("no password provided".to_string()))?;
      let request = RegisterRequest {
        email,
        name,
        password,
        image,
      };
      let user = client.auth.register(&request).await?;
      println!("Registered {}", format_user(&user));
    }
    Command::Logout => {
      client.logout().await?;
      println!("Logged out");
    }
    Command::Whoami => {
      let user = client.auth.current_user().await?;
      println!("{}", format_user(&user));
    }
    Command::Refresh => {
      let user = client.auth.refresh().await?;
      println!("Session refreshed for {}", format_user(&user));
    }
    Command::List {
      page,
      search,
      status,
    } => {
      let filters = TodoFilters { search, status };
      let result = client.todos.list(page, &filters).await?;
      print!("{}", format_page(&result));
      if !client.auth.is_authenticated() {
        println!("Not signed in; only shared todos are shown");
      }
    }
    Command::Show { id } => {
      let result = client.todos.get(&id).await?;
      print!("{}", format_detail(&result.data));
    }
    Command::Add {
      name,
      description,
      priority,
      tags,
    } => {
      let todo = CreateTodo {
        name,
        description,
        priority,
        tags,
        ..CreateTodo::default()
      };
      let created = client.todos.create(&todo).await?;
      println!("Created {}", format_line(&created));
    }
    Command::Edit {
      id,
      name,
      description,
      priority,
      status,
      archived,
    } => {
      let patch = UpdateTodo {
        name,
        description,
        priority,
        status,
        archived,
        ..UpdateTodo::default()
      };
      if patch.is_empty() {
        println!("Nothing to change");
        return Ok(());
      }
      let updated = client.todos.update(&id, &patch).await?;
      println!("Updated {}", format_line(&updated));
    }
    Command::Rm { id } => {
      client.todos.delete(&id).await?;
      println!("Deleted {}", id);
    }
    Command::Toggle { id } => {
      let current = client.todos.get(&id).await?.data;
      let updated = client.todos.toggle_status(&id, current.status).await?;
      println!("{}", format_line(&updated));
    }
    Command::Listen => listen(client).await?,
    Command::Cache {
      action: CacheAction::Clear,
    } => {
      let removed = client.cache.clear()?;
      println!("Removed {} cached entries", removed);
    }
  }

  Ok(())
}

async fn listen(client: &TodoClient) -> Result<()> {
  let handler = client.live_events();
  let sender = handler.sender();
  let mut lines = BufReader::new(tokio::io::stdin()).lines();

  let outcome = loop {
    let line = match lines.next_line().await {
      Ok(Some(line)) => line,
      Ok(None) => break Ok(()),
      Err(e) => break Err(Error::Internal(format!("failed to read stdin: {}", e))),
    };
    if line.trim().is_empty() {
      continue;
    }

    match LiveEvent::parse(&line) {
      Ok(event) => {
        println!("invalidated todo {}", event.entity_id());
        if sender.send(event).is_err() {
          break Ok(());
        }
      }
      Err(e) => warn!(error = %e, "ignoring malformed event"),
    }
  };

  // The applying task only stops once every sender is gone
  drop(sender);
  handler.finish().await;
  outcome
}

fn format_user(user: &User) -> String {
  format!("{} <{}> ({})", user.name, user.email, user.id)
}

fn status_marker(status: TodoStatus) -> &'static str {
  match status {
    TodoStatus::Todo => "[ ]",
    TodoStatus::InProgress => "[~]",
    TodoStatus::Completed => "[x]",
  }
}

fn format_line(todo: &Todo) -> String {
  let mut line = format!(
    "{} {}  {}  ({})",
    status_marker(todo.status),
    todo.id,
    todo.name,
    todo.priority
  );
  if todo.archived {
    line.push_str("  archived");
  }
  line
}

fn format_page(result: &CacheResult<Paginated<Todo>>) -> String {
  let page = &result.data;
  let mut out = String::new();
  if page.data.is_empty() {
    out.push_str("No todos\n");
  }
  for todo in &page.data {
    out.push_str(&format_line(todo));
    out.push('\n');
  }

  let origin = match result.source {
    CacheSource::Network => "fresh".to_string(),
    CacheSource::Cache => match result.cached_at {
      Some(at) => format!("cached {}", at.format("%H:%M:%S")),
      None => "cached".to_string(),
    },
  };
  out.push_str(&format!(
    "page {}/{} · {} total · {}\n",
    page.meta.page,
    page.meta.total_pages.max(1),
    page.meta.total,
    origin
  ));
  out
}

fn format_detail(todo: &Todo) -> String {
  let mut out = format!("{}\n", format_line(todo));
  if let Some(description) = &todo.description {
    out.push_str(&format!("  {}\n", description));
  }
  if let Some(tags) = todo.tags.as_ref().filter(|t| !t.is_empty()) {
    out.push_str(&format!("  tags: {}\n", tags.join(", ")));
  }
  if let Some(owner) = &todo.owner {
    out.push_str(&format!("  owner: {}\n", owner));
  }
  if let Some(completed) = &todo.completed_at {
    out.push_str(&format!("  completed: {}\n", completed));
  }
  out
}

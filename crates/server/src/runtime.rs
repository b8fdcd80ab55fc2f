//! Runtime descriptor: written for clients before the listener accepts
//! traffic, removed on clean shutdown.

use brain_core::{Result, StateDir, paths::atomic_write};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeDescriptor {
  pub base_url: String,
  pub port: u16,
  pub bind_host: String,
  pub pid: u32,
  pub started_at: DateTime<Utc>,
  pub foreground: bool,
}

impl RuntimeDescriptor {
  pub fn for_addr(host: &str, port: u16, foreground: bool) -> Self {
    Self {
      base_url: format!("http://{}:{}", host, port),
      port,
      bind_host: host.to_string(),
      pid: std::process::id(),
      started_at: Utc::now(),
      foreground,
    }
  }

  pub fn write(&self, state: &StateDir) -> Result<()> {
    let json = serde_json::to_vec_pretty(self)?;
    atomic_write(&state.runtime_descriptor(), &json)?;
    Ok(())
  }

  pub fn read(state: &StateDir) -> Result<Option<Self>> {
    match std::fs::read_to_string(state.runtime_descriptor()) {
      Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  pub fn remove(state: &StateDir) -> Result<()> {
    match std::fs::remove_file(state.runtime_descriptor()) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }
}

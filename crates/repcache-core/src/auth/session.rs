use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{Persisted, StateStorage};

/// Storage key for the persisted session
const SESSION_KEY: &str = "session";
const SESSION_VERSION: u32 = 1;

/// Which side of the coaching relationship the user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Assigns routines; mutations reach students through ordinary API calls.
    Coach,
    /// Receives assignments, and therefore push invalidations.
    Student,
}

impl Role {
    pub fn receives_assignments(&self) -> bool {
        matches!(self, Role::Student)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Coach => f.write_str("coach"),
            Role::Student => f.write_str("student"),
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "coach" | "trainer" => Ok(Role::Coach),
            "student" => Ok(Role::Student),
            other => Err(anyhow::anyhow!("Unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub token: String,
    pub user_id: i64,
    pub display_name: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl SessionData {
    pub fn is_authenticated(&self) -> bool {
        !self.token.is_empty()
    }
}

pub struct Session {
    persisted: Persisted<SessionData>,
    pub data: Option<SessionData>,
}

impl Session {
    pub fn new(storage: Arc<dyn StateStorage>) -> Self {
        Self {
            persisted: Persisted::new(storage, SESSION_KEY, SESSION_VERSION),
            data: None,
        }
    }

    /// Load session from storage
    pub fn load(&mut self) -> bool {
        self.data = self.persisted.hydrate();
        self.data.is_some()
    }

    /// Save session to storage
    pub fn save(&self) -> Result<()> {
        if let Some(ref data) = self.data {
            self.persisted.write(data)?;
        }
        Ok(())
    }

    /// Clear session data
    pub fn clear(&mut self) -> Result<()> {
        self.data = None;
        self.persisted.remove()
    }

    /// Update session with new data
    pub fn update(&mut self, data: SessionData) {
        self.data = Some(data);
    }

    /// Get the bearer token if a session exists
    pub fn token(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.token.as_str())
    }

    pub fn user_id(&self) -> Option<i64> {
        self.data.as_ref().map(|d| d.user_id)
    }

    pub fn role(&self) -> Option<Role> {
        self.data.as_ref().map(|d| d.role)
    }

    pub fn is_valid(&self) -> bool {
        self.data.as_ref().is_some_and(SessionData::is_authenticated)
    }
}

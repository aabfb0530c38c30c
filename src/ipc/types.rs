use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::store::TermLocks;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub locks: TermLocks,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            locks: TermLocks::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Teacher,
    Student,
    Parent,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "teacher" => Some(Self::Teacher),
            "student" => Some(Self::Student),
            "parent" => Some(Self::Parent),
            _ => None,
        }
    }

    pub fn can_write_marks(self) -> bool {
        match self {
            Self::Admin | Self::Teacher => true,
            Self::Student | Self::Parent => false,
        }
    }
}

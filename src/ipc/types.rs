use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::ai::NarrativeClient;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Per-process state, constructed once in `main` and passed into every
/// handler. The persistence handle and the narrative client both live here;
/// nothing is ambient.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub narrative: Option<NarrativeClient>,
}

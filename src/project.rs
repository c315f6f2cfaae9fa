use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cell_history::CellHistory;
use crate::grid::{CellKey, GridConfig};

/// Default title for a project that has never been named.
pub const UNTITLED: &str = "Untitled Project";

/// Text appended to every generation prompt while enabled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptAssist {
    pub text: String,
    pub enabled: bool,
}

impl PromptAssist {
    pub fn new(text: impl Into<String>, enabled: bool) -> Self {
        Self {
            text: text.into(),
            enabled,
        }
    }

    pub fn defaults() -> Vec<PromptAssist> {
        vec![
            PromptAssist::new("4k, detailed, high resolution", true),
            PromptAssist::new("cinematic lighting", false),
            PromptAssist::new("watercolor painting style", false),
        ]
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub date_created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version_note: String,
    #[serde(default)]
    pub prompt_assists: Vec<PromptAssist>,
}

impl Default for ProjectMetadata {
    fn default() -> Self {
        Self {
            title: UNTITLED.to_string(),
            description: String::new(),
            author: String::new(),
            date_created: None,
            date_modified: None,
            version_note: "Initial version".to_string(),
            prompt_assists: PromptAssist::defaults(),
        }
    }
}

/// Editor preferences that travel with the project file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiPrefs {
    #[serde(default = "default_show_grid")]
    pub show_grid: bool,
    #[serde(default)]
    pub api_key: String,
}

fn default_show_grid() -> bool {
    true
}

impl Default for UiPrefs {
    fn default() -> Self {
        Self {
            show_grid: true,
            api_key: String::new(),
        }
    }
}

/// Everything that is saved, loaded and snapshotted for undo.
///
/// Plain owned data with no shared pointers: `clone()` is a full deep copy.
/// Deserialization goes through [`crate::io::parse_project`], which
/// validates and upgrades older documents.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectState {
    pub metadata: ProjectMetadata,
    /// `None` while the editor shows the welcome screen.
    pub base_image_ref: Option<String>,
    pub grid_config: GridConfig,
    pub cell_history: CellHistory,
    pub ui: UiPrefs,
}

impl ProjectState {
    pub fn new(grid_config: GridConfig) -> Self {
        Self {
            grid_config,
            ..Self::default()
        }
    }

    /// Fresh state for a newly loaded base image. Grid shape, metadata and
    /// UI prefs carry over; cell history does not.
    pub fn with_base_image(&self, base_image_ref: String, now: DateTime<Utc>) -> Self {
        let mut metadata = self.metadata.clone();
        metadata.date_created = Some(now);
        Self {
            metadata,
            base_image_ref: Some(base_image_ref),
            grid_config: self.grid_config,
            cell_history: CellHistory::new(),
            ui: self.ui.clone(),
        }
    }

    pub fn has_base_image(&self) -> bool {
        self.base_image_ref.is_some()
    }

    pub fn contains_cell(&self, key: CellKey) -> bool {
        self.grid_config.contains(key)
    }

    /// Window/title-bar text.
    pub fn display_title(&self) -> String {
        if self.metadata.title.trim().is_empty() {
            UNTITLED.to_string()
        } else {
            self.metadata.title.clone()
        }
    }
}

// ============================================================================
// EDITOR SESSION — owned project state + explicit command dispatcher
// ============================================================================
//
// One session per running editor. Every user action is a `Command`; the
// dispatcher runs all fallible work (decoding, generation, crop rendering)
// first and only then records history and swaps in the new state, so a
// failed command leaves the session exactly as it was.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::Utc;
use image::RgbaImage;
use uuid::Uuid;

use crate::compositor::{self, RenderOptions};
use crate::error::{DecodeError, EditorError, GenerationError};
use crate::grid::{CellKey, GridConfig, GridLayout};
use crate::history::HistoryStack;
use crate::image_handle::ImageHandle;
use crate::io::{self, LoadedProject};
use crate::ops::crop;
use crate::ops::generate::{self, ImageGenerator};
use crate::ops::grid_ops;
use crate::project::{ProjectState, PromptAssist};
use crate::settings::EditorSettings;

/// Undo labels shown in the history list.
pub mod labels {
    pub const INITIAL_IMAGE: &str = "Initial Image";
    pub const OPEN_PROJECT: &str = "Open Project";
    pub const CHANGE_GRID: &str = "Change Grid";
    pub const AI_GENERATE: &str = "AI Generate";
    pub const UPLOAD_IMAGE: &str = "Upload Image";
    pub const REVERT_CELL: &str = "Revert Cell";
    pub const CROP_IMAGE: &str = "Crop Image";
    pub const EDIT_METADATA: &str = "Edit Metadata";
}

/// What the front end should do after a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderInstruction {
    /// Nothing visible changed.
    None,
    /// Re-render the composite.
    Redraw,
    /// No base image: show the welcome screen.
    Welcome,
}

/// One metadata field edit; each is a single undoable step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetadataEdit {
    Title(String),
    Description(String),
    Author(String),
    VersionNote(String),
    AddAssist(String),
    ToggleAssist(usize),
    RemoveAssist(usize),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Start over from an encoded image; grid shape carries over.
    LoadBaseImage { bytes: Vec<u8> },
    /// Replace the whole session with a saved project document.
    LoadProject { json: String },
    ChangeGrid(GridConfig),
    /// Make `key` the target of generate / upload / revert.
    SelectCell(CellKey),
    /// Click at composite pixel `(x, y)`: toggles the cell's crop selection
    /// in crop mode, otherwise selects it.
    Click { x: u32, y: u32 },
    Generate { prompt: String },
    UploadReplacement { bytes: Vec<u8> },
    RevertCell,
    ToggleCropMode,
    ToggleCropCell(CellKey),
    Crop,
    Undo,
    Redo,
    EditMetadata(MetadataEdit),
    SetShowGrid(bool),
    SetApiKey(String),
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::LoadBaseImage { .. } => "load-base-image",
            Command::LoadProject { .. } => "load-project",
            Command::ChangeGrid(_) => "change-grid",
            Command::SelectCell(_) => "select-cell",
            Command::Click { .. } => "click",
            Command::Generate { .. } => "generate",
            Command::UploadReplacement { .. } => "upload-replacement",
            Command::RevertCell => "revert-cell",
            Command::ToggleCropMode => "toggle-crop-mode",
            Command::ToggleCropCell(_) => "toggle-crop-cell",
            Command::Crop => "crop",
            Command::Undo => "undo",
            Command::Redo => "redo",
            Command::EditMetadata(_) => "edit-metadata",
            Command::SetShowGrid(_) => "set-show-grid",
            Command::SetApiKey(_) => "set-api-key",
        }
    }
}

pub struct EditorSession {
    pub id: Uuid,
    state: ProjectState,
    /// Decoded `state.base_image_ref`; `None` in the welcome phase.
    base: Option<ImageHandle>,
    history: HistoryStack,
    crop_mode: bool,
    crop_selection: BTreeSet<CellKey>,
    active_cell: Option<CellKey>,
    generating: bool,
    settings: EditorSettings,
}

impl EditorSession {
    pub fn new(settings: EditorSettings) -> Self {
        let id = Uuid::new_v4();
        log::info!("Session {} started", id);
        Self {
            id,
            state: ProjectState::new(settings.default_grid),
            base: None,
            history: HistoryStack::new(settings.max_undo_steps),
            crop_mode: false,
            crop_selection: BTreeSet::new(),
            active_cell: None,
            generating: false,
            settings,
        }
    }

    /// Session opened on an already-validated project.
    pub fn from_loaded(loaded: LoadedProject, settings: EditorSettings) -> Self {
        let mut session = Self::new(settings);
        session.install(loaded.state, Some(loaded.base), labels::OPEN_PROJECT);
        session
    }

    pub fn open_file(path: &Path, settings: EditorSettings) -> Result<Self, EditorError> {
        let loaded = io::load_project_file(path)?;
        Ok(Self::from_loaded(loaded, settings))
    }

    // ---- accessors ---------------------------------------------------------

    pub fn state(&self) -> &ProjectState {
        &self.state
    }

    pub fn base(&self) -> Option<&ImageHandle> {
        self.base.as_ref()
    }

    pub fn history(&self) -> &HistoryStack {
        &self.history
    }

    pub fn settings(&self) -> &EditorSettings {
        &self.settings
    }

    pub fn crop_mode(&self) -> bool {
        self.crop_mode
    }

    pub fn crop_selection(&self) -> &BTreeSet<CellKey> {
        &self.crop_selection
    }

    pub fn active_cell(&self) -> Option<CellKey> {
        self.active_cell
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    pub fn has_project(&self) -> bool {
        self.base.is_some()
    }

    /// Key sent to the provider: the project's, else the settings fallback.
    pub fn effective_api_key(&self) -> &str {
        if self.state.ui.api_key.trim().is_empty() {
            &self.settings.api_key
        } else {
            &self.state.ui.api_key
        }
    }

    // ---- rendering ---------------------------------------------------------

    /// Current layout, or `None` in the welcome phase.
    pub fn layout(&self) -> Option<GridLayout> {
        let base = self.base.as_ref()?;
        Some(GridLayout::compute(
            self.state.grid_config,
            base.width(),
            base.height(),
            &self.state.cell_history,
        ))
    }

    /// Editing view: grid lines per the UI pref, crop selection while in crop
    /// mode.
    pub fn render(&self) -> Result<Option<RgbaImage>, DecodeError> {
        let Some(base) = self.base.as_ref() else {
            return Ok(None);
        };
        let selection = self.crop_mode.then_some(&self.crop_selection);
        compositor::render_image(&self.state, base, &RenderOptions::editing(selection)).map(Some)
    }

    /// Clean composite for export.
    pub fn render_export(&self) -> Result<RgbaImage, EditorError> {
        let base = self.base.as_ref().ok_or(EditorError::NoProject)?;
        Ok(compositor::render_image(&self.state, base, &RenderOptions::export())?)
    }

    // ---- persistence -------------------------------------------------------

    /// Serialize for saving; stamps `dateModified`.
    pub fn save_json(&mut self) -> Result<String, EditorError> {
        let stamped = self.stamped_for_save()?;
        let json = io::project_to_json(&stamped)?;
        self.state.metadata.date_modified = stamped.metadata.date_modified;
        Ok(json)
    }

    /// Write the project to `path`. `dateModified` is only updated once the
    /// file has been written.
    pub fn save_to(&mut self, path: &Path) -> Result<(), EditorError> {
        let stamped = self.stamped_for_save()?;
        io::save_project_file(&stamped, path)?;
        self.state.metadata.date_modified = stamped.metadata.date_modified;
        Ok(())
    }

    fn stamped_for_save(&self) -> Result<ProjectState, EditorError> {
        if !self.has_project() {
            return Err(EditorError::NoProject);
        }
        let mut stamped = self.state.clone();
        stamped.metadata.date_modified = Some(Utc::now());
        Ok(stamped)
    }

    /// Write the export composite; the format comes from the path's
    /// extension, falling back to the configured one.
    pub fn export_to(&self, path: &Path) -> Result<(), EditorError> {
        let image = self.render_export()?;
        let format = io::ExportFormat::from_path(path).unwrap_or(self.settings.export_format);
        io::encode_and_write(&image, path, format, self.settings.jpeg_quality)?;
        log::info!("Exported {}x{} {} to {}", image.width(), image.height(), format, path.display());
        Ok(())
    }

    /// Default export file name for the current title.
    pub fn export_file_name(&self) -> String {
        io::export_file_name(&self.state.metadata.title, self.settings.export_format)
    }

    // ---- dispatcher --------------------------------------------------------

    pub fn dispatch(
        &mut self,
        command: Command,
        generator: &dyn ImageGenerator,
    ) -> Result<RenderInstruction, EditorError> {
        let name = command.name();
        log::debug!("[{}] {}", self.id, name);
        let result = self.run(command, generator);
        if let Err(e) = &result {
            log::warn!("[{}] {} failed: {}", self.id, name, e);
        }
        result
    }

    fn run(
        &mut self,
        command: Command,
        generator: &dyn ImageGenerator,
    ) -> Result<RenderInstruction, EditorError> {
        match command {
            Command::LoadBaseImage { bytes } => self.load_base_image(&bytes),
            Command::LoadProject { json } => {
                let loaded = io::parse_project(&json)?;
                self.install(loaded.state, Some(loaded.base), labels::OPEN_PROJECT);
                Ok(RenderInstruction::Redraw)
            }
            Command::ChangeGrid(grid) => self.change_grid(grid),
            Command::SelectCell(key) => {
                self.require_base()?;
                grid_ops::check_cell(&self.state, key)?;
                self.active_cell = Some(key);
                Ok(RenderInstruction::None)
            }
            Command::Click { x, y } => {
                let layout = self.layout().ok_or(EditorError::NoProject)?;
                let Some(key) = layout.cell_at(x, y) else {
                    return Ok(RenderInstruction::None);
                };
                if self.crop_mode {
                    self.toggle_crop_cell(key)
                } else {
                    self.active_cell = Some(key);
                    Ok(RenderInstruction::None)
                }
            }
            Command::Generate { prompt } => self.generate(&prompt, generator),
            Command::UploadReplacement { bytes } => {
                self.require_base()?;
                let key = self.require_active_cell()?;
                let version = grid_ops::uploaded_version(&bytes)?;
                self.apply(labels::UPLOAD_IMAGE, |s| s.cell_history.append(key, version));
                Ok(RenderInstruction::Redraw)
            }
            Command::RevertCell => {
                self.require_base()?;
                let key = self.require_active_cell()?;
                if !self.state.cell_history.has(key) {
                    return Ok(RenderInstruction::None);
                }
                self.apply(labels::REVERT_CELL, |s| {
                    s.cell_history.pop_latest(key);
                });
                Ok(RenderInstruction::Redraw)
            }
            Command::ToggleCropMode => {
                self.require_base()?;
                self.crop_mode = !self.crop_mode;
                self.crop_selection.clear();
                Ok(RenderInstruction::Redraw)
            }
            Command::ToggleCropCell(key) => {
                self.require_base()?;
                grid_ops::check_cell(&self.state, key)?;
                self.toggle_crop_cell(key)
            }
            Command::Crop => self.crop(),
            Command::Undo => self.step_history(true),
            Command::Redo => self.step_history(false),
            Command::EditMetadata(edit) => self.edit_metadata(edit),
            Command::SetShowGrid(show) => {
                self.state.ui.show_grid = show;
                Ok(self.redraw_or_welcome())
            }
            Command::SetApiKey(key) => {
                self.state.ui.api_key = key;
                Ok(RenderInstruction::None)
            }
        }
    }

    // ---- commands ----------------------------------------------------------

    fn load_base_image(&mut self, bytes: &[u8]) -> Result<RenderInstruction, EditorError> {
        check_grid(self.state.grid_config)?;
        let handle = ImageHandle::decode_bytes(bytes)?;
        let base_ref = handle.to_data_uri()?;
        let state = self.state.with_base_image(base_ref, Utc::now());
        log::info!(
            "[{}] Base image {}x{} loaded, grid {}",
            self.id,
            handle.width(),
            handle.height(),
            state.grid_config
        );
        self.install(state, Some(handle), labels::INITIAL_IMAGE);
        Ok(RenderInstruction::Redraw)
    }

    fn change_grid(&mut self, grid: GridConfig) -> Result<RenderInstruction, EditorError> {
        let base = self.require_base()?;
        check_grid(grid)?;
        let (next, new_base) = grid_ops::regrid(&self.state, base, grid)?;
        self.history.record(labels::CHANGE_GRID, &self.state);
        self.state = next;
        self.base = Some(new_base);
        self.history.commit(&self.state);
        self.reset_transient();
        Ok(RenderInstruction::Redraw)
    }

    fn generate(
        &mut self,
        prompt: &str,
        generator: &dyn ImageGenerator,
    ) -> Result<RenderInstruction, EditorError> {
        if self.generating {
            return Err(GenerationError::Busy.into());
        }
        let base = self.base.as_ref().ok_or(EditorError::NoProject)?;
        let key = self.active_cell.ok_or(EditorError::NoActiveCell)?;
        grid_ops::check_cell(&self.state, key)?;
        let api_key = self.effective_api_key().to_string();

        self.generating = true;
        let result = generate::generate_cell_version(&self.state, base, key, prompt, &api_key, generator);
        self.generating = false;

        let version = result?;
        self.apply(labels::AI_GENERATE, |s| s.cell_history.append(key, version));
        Ok(RenderInstruction::Redraw)
    }

    fn toggle_crop_cell(&mut self, key: CellKey) -> Result<RenderInstruction, EditorError> {
        if !self.crop_mode {
            return Ok(RenderInstruction::None);
        }
        if !self.crop_selection.remove(&key) {
            self.crop_selection.insert(key);
        }
        Ok(RenderInstruction::Redraw)
    }

    fn crop(&mut self) -> Result<RenderInstruction, EditorError> {
        let base = self.require_base()?;
        let Some(outcome) = crop::crop_to_selection(&self.state, base, &self.crop_selection)? else {
            log::debug!("[{}] crop with empty selection ignored", self.id);
            return Ok(RenderInstruction::None);
        };
        self.history.record(labels::CROP_IMAGE, &self.state);
        self.state = outcome.state;
        self.base = Some(outcome.base);
        self.history.commit(&self.state);
        self.active_cell = self.active_cell.and_then(|k| outcome.bounds.translate(k));
        self.crop_mode = false;
        self.crop_selection.clear();
        Ok(RenderInstruction::Redraw)
    }

    fn step_history(&mut self, back: bool) -> Result<RenderInstruction, EditorError> {
        let restore = |snap: &ProjectState| -> Result<(ProjectState, Option<ImageHandle>), DecodeError> {
            let base = snap
                .base_image_ref
                .as_deref()
                .map(ImageHandle::decode_ref)
                .transpose()?;
            Ok((snap.clone(), base))
        };
        let restored = if back {
            self.history.undo(restore)?
        } else {
            self.history.redo(restore)?
        };
        let Some((state, base)) = restored else {
            return Ok(RenderInstruction::None);
        };
        self.state = state;
        self.base = base;
        self.reset_transient();
        Ok(self.redraw_or_welcome())
    }

    fn edit_metadata(&mut self, edit: MetadataEdit) -> Result<RenderInstruction, EditorError> {
        let assists = self.state.metadata.prompt_assists.len();
        if let MetadataEdit::ToggleAssist(i) | MetadataEdit::RemoveAssist(i) = edit
            && i >= assists
        {
            log::debug!("[{}] prompt assist {} does not exist ({} total)", self.id, i, assists);
            return Ok(RenderInstruction::None);
        }
        self.apply(labels::EDIT_METADATA, |s| {
            let m = &mut s.metadata;
            match edit {
                MetadataEdit::Title(v) => m.title = v,
                MetadataEdit::Description(v) => m.description = v,
                MetadataEdit::Author(v) => m.author = v,
                MetadataEdit::VersionNote(v) => m.version_note = v,
                MetadataEdit::AddAssist(text) => m.prompt_assists.push(PromptAssist::new(text, true)),
                MetadataEdit::ToggleAssist(i) => m.prompt_assists[i].enabled = !m.prompt_assists[i].enabled,
                MetadataEdit::RemoveAssist(i) => {
                    m.prompt_assists.remove(i);
                }
            }
        });
        Ok(RenderInstruction::None)
    }

    // ---- helpers -----------------------------------------------------------

    /// Record, mutate, commit: one undoable step.
    fn apply(&mut self, label: &str, mutate: impl FnOnce(&mut ProjectState)) {
        self.history.record(label, &self.state);
        mutate(&mut self.state);
        self.history.commit(&self.state);
    }

    /// Replace everything and start a fresh undo stack at `label`.
    fn install(&mut self, state: ProjectState, base: Option<ImageHandle>, label: &str) {
        self.state = state;
        self.base = base;
        self.history.clear();
        self.history.record(label, &self.state);
        self.reset_transient();
        self.active_cell = None;
        self.generating = false;
    }

    /// Drop crop mode/selection and any active cell that no longer exists.
    fn reset_transient(&mut self) {
        self.crop_mode = false;
        self.crop_selection.clear();
        if let Some(key) = self.active_cell
            && !self.state.contains_cell(key)
        {
            self.active_cell = None;
        }
    }

    fn redraw_or_welcome(&self) -> RenderInstruction {
        if self.base.is_some() {
            RenderInstruction::Redraw
        } else {
            RenderInstruction::Welcome
        }
    }

    fn require_base(&self) -> Result<&ImageHandle, EditorError> {
        self.base.as_ref().ok_or(EditorError::NoProject)
    }

    fn require_active_cell(&self) -> Result<CellKey, EditorError> {
        let key = self.active_cell.ok_or(EditorError::NoActiveCell)?;
        grid_ops::check_cell(&self.state, key)?;
        Ok(key)
    }
}

fn check_grid(grid: GridConfig) -> Result<(), EditorError> {
    if io::grid_in_bounds(grid) {
        Ok(())
    } else {
        Err(EditorError::InvalidGrid {
            rows: grid.rows,
            cols: grid.cols,
        })
    }
}

impl Default for EditorSession {
    fn default() -> Self {
        Self::new(EditorSettings::default())
    }
}

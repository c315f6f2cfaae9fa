use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use image::{ImageError, RgbaImage};
use rayon::prelude::*;
use serde::Deserialize;

use crate::cell_history::{CellHistory, CellVersion};
use crate::error::{DecodeError, ProjectFileError};
use crate::grid::{CellKey, GridConfig};
use crate::image_handle::{self, ImageHandle};
use crate::project::{ProjectMetadata, ProjectState, UiPrefs};

/// Prompt text given to legacy replacements that carry none.
pub const LEGACY_PROMPT: &str = "Imported";

/// Maximum rows or columns of a grid, on load and on regrid.
pub const MAX_GRID_DIM: u32 = 1024;

// ============================================================================
// PROJECT FILE FORMAT (JSON)
// ============================================================================
//
// Saved documents are `ProjectState` serialized with camelCase keys. Loading
// goes through the lenient document types below so older editors' files are
// accepted: `baseImageSrc`/`src`/`prompt` spellings, and cells holding a
// single replacement object instead of a version list (or a separate
// `replacements` map).

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectDocument {
    #[serde(default)]
    metadata: Option<MetadataDocument>,
    #[serde(default, alias = "baseImageSrc")]
    base_image_ref: Option<String>,
    #[serde(default)]
    grid_config: Option<GridConfig>,
    #[serde(default)]
    cell_history: Option<BTreeMap<String, HistoryValue>>,
    #[serde(default)]
    replacements: Option<BTreeMap<String, VersionDocument>>,
    #[serde(default)]
    ui: Option<UiPrefs>,
}

#[derive(Deserialize)]
struct MetadataDocument {
    #[serde(flatten)]
    metadata: ProjectMetadata,
    /// Legacy per-cell prompt map, keyed like `cellHistory`.
    #[serde(default)]
    prompts: Option<BTreeMap<String, serde_json::Value>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryValue {
    List(Vec<VersionDocument>),
    Single(VersionDocument),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionDocument {
    #[serde(alias = "src")]
    image_ref: String,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default, alias = "prompt")]
    prompt_text: Option<String>,
}

/// A version waiting for its image to be verified.
struct PendingVersion {
    key: CellKey,
    doc: VersionDocument,
    prompt_text: Option<String>,
}

/// A validated project together with its decoded base image.
#[derive(Debug)]
pub struct LoadedProject {
    pub state: ProjectState,
    pub base: ImageHandle,
}

/// Parse and validate a project document.
///
/// Every embedded image is decoded; versions whose recorded size disagrees
/// with the decoded image are corrected (and logged).
pub fn parse_project(json: &str) -> Result<LoadedProject, ProjectFileError> {
    let doc: ProjectDocument = serde_json::from_str(json)?;

    let MetadataDocument { metadata, prompts } =
        doc.metadata.ok_or(ProjectFileError::MissingField("metadata"))?;
    let base_ref = doc
        .base_image_ref
        .ok_or(ProjectFileError::MissingField("baseImageRef"))?;

    let grid = doc.grid_config.unwrap_or_default();
    if !grid_in_bounds(grid) {
        return Err(ProjectFileError::InvalidGrid {
            rows: grid.rows,
            cols: grid.cols,
        });
    }

    let legacy_prompt = |raw_key: &str| -> Option<String> {
        let text = prompts
            .as_ref()
            .and_then(|p| p.get(raw_key))
            .and_then(|v| v.as_str())
            .unwrap_or(LEGACY_PROMPT);
        Some(text.to_string())
    };

    let mut pending = Vec::new();
    for (raw_key, value) in doc.cell_history.unwrap_or_default() {
        let key = parse_cell_key(&raw_key, grid)?;
        match value {
            HistoryValue::List(versions) => {
                pending.extend(versions.into_iter().map(|doc| PendingVersion {
                    key,
                    prompt_text: doc.prompt_text.clone(),
                    doc,
                }));
            }
            HistoryValue::Single(doc) => {
                log::info!("Upgrading single-replacement cell {}", key);
                pending.push(PendingVersion {
                    key,
                    prompt_text: legacy_prompt(&raw_key),
                    doc,
                });
            }
        }
    }
    let history_keys: Vec<CellKey> = pending.iter().map(|p| p.key).collect();
    for (raw_key, doc) in doc.replacements.unwrap_or_default() {
        let key = parse_cell_key(&raw_key, grid)?;
        if history_keys.contains(&key) {
            continue;
        }
        log::info!("Upgrading legacy replacement for cell {}", key);
        pending.push(PendingVersion {
            key,
            prompt_text: legacy_prompt(&raw_key),
            doc,
        });
    }

    let (base, versions) = rayon::join(
        || {
            ImageHandle::decode_ref(&base_ref).map_err(|source| ProjectFileError::Image {
                what: "base image".to_string(),
                source,
            })
        },
        || {
            pending
                .into_par_iter()
                .map(verify_version)
                .collect::<Result<Vec<_>, _>>()
        },
    );
    let base = base?;
    let versions = versions?;

    let mut cells: BTreeMap<CellKey, Vec<CellVersion>> = BTreeMap::new();
    for (key, version) in versions {
        cells.entry(key).or_default().push(version);
    }

    let state = ProjectState {
        metadata,
        base_image_ref: Some(base_ref),
        grid_config: grid,
        cell_history: CellHistory::from_cells(cells),
        ui: doc.ui.unwrap_or_default(),
    };
    log::info!(
        "Loaded project '{}' ({} grid, {} replaced cells, {} versions)",
        state.display_title(),
        state.grid_config,
        state.cell_history.len(),
        state.cell_history.version_count()
    );
    Ok(LoadedProject { state, base })
}

pub fn grid_in_bounds(grid: GridConfig) -> bool {
    (1..=MAX_GRID_DIM).contains(&grid.rows) && (1..=MAX_GRID_DIM).contains(&grid.cols)
}

fn parse_cell_key(raw: &str, grid: GridConfig) -> Result<CellKey, ProjectFileError> {
    let key: CellKey = raw
        .parse()
        .map_err(|_| ProjectFileError::InvalidCellKey(raw.to_string()))?;
    if !grid.contains(key) {
        return Err(ProjectFileError::KeyOutOfRange {
            key: raw.to_string(),
            rows: grid.rows,
            cols: grid.cols,
        });
    }
    Ok(key)
}

fn verify_version(pending: PendingVersion) -> Result<(CellKey, CellVersion), ProjectFileError> {
    let PendingVersion {
        key,
        doc,
        prompt_text,
    } = pending;
    let handle = ImageHandle::decode_ref(&doc.image_ref).map_err(|source| ProjectFileError::Image {
        what: format!("cell {}", key),
        source,
    })?;

    let claimed = (doc.width, doc.height);
    if claimed != (Some(handle.width()), Some(handle.height())) {
        log::warn!(
            "Cell {}: recorded size {:?}x{:?} does not match image {}x{}, using the image size",
            key,
            doc.width,
            doc.height,
            handle.width(),
            handle.height()
        );
    }
    Ok((key, CellVersion::from_decoded(doc.image_ref, &handle, prompt_text)))
}

/// Read and validate a project file from disk.
pub fn load_project_file(path: &Path) -> Result<LoadedProject, ProjectFileError> {
    let json = std::fs::read_to_string(path)?;
    parse_project(&json)
}

/// Serialize a project as pretty-printed JSON.
pub fn project_to_json(state: &ProjectState) -> Result<String, ProjectFileError> {
    Ok(serde_json::to_string_pretty(state)?)
}

/// Write a project file.
pub fn save_project_file(state: &ProjectState, path: &Path) -> Result<(), ProjectFileError> {
    let json = project_to_json(state)?;
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(json.as_bytes())?;
    writer.flush()?;
    log::info!("Saved project to {}", path.display());
    Ok(())
}

// ============================================================================
// IMAGE EXPORT
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExportFormat {
    #[default]
    Png,
    Jpeg,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpeg => "jpg",
        }
    }

    /// Guess from a file path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| e.parse().ok())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(ExportFormat::Png),
            "jpg" | "jpeg" => Ok(ExportFormat::Jpeg),
            other => Err(format!("unsupported export format '{}'", other)),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Png => write!(f, "png"),
            ExportFormat::Jpeg => write!(f, "jpeg"),
        }
    }
}

/// Lowercase title with every run of non-alphanumerics collapsed to `-`.
pub fn slug(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut pending_dash = false;
    for ch in title.chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch);
        } else {
            pending_dash = true;
        }
    }
    if out.is_empty() {
        "untitled".to_string()
    } else {
        out
    }
}

/// `<slug>.<ext>` for an exported composite.
pub fn export_file_name(title: &str, format: ExportFormat) -> String {
    format!("{}.{}", slug(title), format.extension())
}

pub fn encode_image(image: &RgbaImage, format: ExportFormat, quality: u8) -> Result<Vec<u8>, ImageError> {
    match format {
        ExportFormat::Png => image_handle::encode_png(image),
        ExportFormat::Jpeg => image_handle::encode_jpeg(image, quality),
    }
}

/// Encode and write an image to a file.
pub fn encode_and_write(
    image: &RgbaImage,
    path: &Path,
    format: ExportFormat,
    quality: u8,
) -> Result<(), ImageError> {
    let bytes = encode_image(image, format, quality)?;
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Read an image file from disk for use as a base or replacement.
pub fn read_image_bytes(path: &Path) -> Result<Vec<u8>, DecodeError> {
    let bytes = std::fs::read(path).map_err(|e| DecodeError::Image(ImageError::IoError(e)))?;
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(bytes)
}

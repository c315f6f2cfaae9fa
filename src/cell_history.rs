// ============================================================================
// CELL HISTORY — per-cell append-only version lists
// ============================================================================

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::DecodeError;
use crate::grid::CellKey;
use crate::image_handle::ImageHandle;

/// One replacement image for a cell. Immutable once created: the only public
/// constructors decode the image, so `width`/`height` are always the true
/// pixel dimensions of `image_ref`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellVersion {
    image_ref: String,
    width: u32,
    height: u32,
    prompt_text: Option<String>,
}

impl CellVersion {
    /// Decode `image_ref` and build a version carrying its real dimensions.
    pub fn from_ref(image_ref: String, prompt_text: Option<String>) -> Result<Self, DecodeError> {
        let handle = ImageHandle::decode_ref(&image_ref)?;
        Ok(Self::from_decoded(image_ref, &handle, prompt_text))
    }

    /// Build from a reference that has already been decoded into `handle`.
    pub fn from_decoded(image_ref: String, handle: &ImageHandle, prompt_text: Option<String>) -> Self {
        Self {
            image_ref,
            width: handle.width(),
            height: handle.height(),
            prompt_text,
        }
    }

    pub fn image_ref(&self) -> &str {
        &self.image_ref
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn prompt_text(&self) -> Option<&str> {
        self.prompt_text.as_deref()
    }

    pub fn decode(&self) -> Result<ImageHandle, DecodeError> {
        ImageHandle::decode_ref(&self.image_ref)
    }

    #[cfg(test)]
    pub(crate) fn sized_for_test(width: u32, height: u32) -> Self {
        Self {
            image_ref: format!("test:{}x{}", width, height),
            width,
            height,
            prompt_text: None,
        }
    }
}

/// CellKey → ordered version list (insertion order = generation order).
///
/// A key is present only while its list is non-empty, so "no history" has a
/// single representation and [`CellHistory::has`] is the one predicate
/// callers need. Loading goes through [`crate::io::parse_project`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CellHistory {
    cells: BTreeMap<CellKey, Vec<CellVersion>>,
}

impl CellHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, key: CellKey, version: CellVersion) {
        self.cells.entry(key).or_default().push(version);
    }

    /// Remove the most recent version; the cell reverts to its base slice
    /// once the list is empty.
    pub fn pop_latest(&mut self, key: CellKey) -> Option<CellVersion> {
        let versions = self.cells.get_mut(&key)?;
        let popped = versions.pop();
        if versions.is_empty() {
            self.cells.remove(&key);
        }
        popped
    }

    pub fn latest(&self, key: CellKey) -> Option<&CellVersion> {
        self.cells.get(&key).and_then(|v| v.last())
    }

    pub fn has(&self, key: CellKey) -> bool {
        self.latest(key).is_some()
    }

    /// Full version list of a cell, oldest first. Empty when absent.
    pub fn versions(&self, key: CellKey) -> &[CellVersion] {
        self.cells.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `(key, latest version)` for every cell with history, in key order.
    pub fn latest_entries(&self) -> impl Iterator<Item = (CellKey, &CellVersion)> {
        self.cells
            .iter()
            .filter_map(|(key, versions)| versions.last().map(|v| (*key, v)))
    }

    /// Number of cells with history.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Total number of versions across all cells.
    pub fn version_count(&self) -> usize {
        self.cells.values().map(Vec::len).sum()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }

    /// Build a new history by re-keying `source` through `key_mapping`.
    /// Cells the mapping returns `None` for are dropped; carried cells keep
    /// their full version list unchanged.
    pub fn remap(source: &CellHistory, key_mapping: impl Fn(CellKey) -> Option<CellKey>) -> Self {
        let cells = source
            .cells
            .iter()
            .filter(|(_, versions)| !versions.is_empty())
            .filter_map(|(key, versions)| key_mapping(*key).map(|new_key| (new_key, versions.clone())))
            .collect();
        Self { cells }
    }

    pub(crate) fn from_cells(cells: BTreeMap<CellKey, Vec<CellVersion>>) -> Self {
        let cells = cells.into_iter().filter(|(_, v)| !v.is_empty()).collect();
        Self { cells }
    }
}

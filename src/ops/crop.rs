// ============================================================================
// CROP — keep the bounding rectangle of the selected cells
// ============================================================================
//
// The kept rectangle is baked into a new base image, the grid shrinks to the
// rectangle's shape and cell history is re-keyed into the new coordinates.

use std::collections::BTreeSet;

use crate::cell_history::CellHistory;
use crate::compositor;
use crate::error::DecodeError;
use crate::grid::{CellKey, GridConfig, GridLayout};
use crate::image_handle::ImageHandle;
use crate::project::ProjectState;

/// Inclusive cell bounds of a selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellBounds {
    pub min_row: u32,
    pub max_row: u32,
    pub min_col: u32,
    pub max_col: u32,
}

impl CellBounds {
    /// Bounding rectangle of `selection`; `None` when empty. Gaps inside a
    /// non-contiguous selection are kept.
    pub fn of(selection: &BTreeSet<CellKey>) -> Option<Self> {
        let first = selection.iter().next()?;
        let init = Self {
            min_row: first.row,
            max_row: first.row,
            min_col: first.col,
            max_col: first.col,
        };
        Some(selection.iter().fold(init, |b, k| Self {
            min_row: b.min_row.min(k.row),
            max_row: b.max_row.max(k.row),
            min_col: b.min_col.min(k.col),
            max_col: b.max_col.max(k.col),
        }))
    }

    pub fn rows(&self) -> u32 {
        self.max_row - self.min_row + 1
    }

    pub fn cols(&self) -> u32 {
        self.max_col - self.min_col + 1
    }

    /// Position of `key` inside the rectangle, if it lies there.
    pub fn translate(&self, key: CellKey) -> Option<CellKey> {
        let inside = (self.min_row..=self.max_row).contains(&key.row)
            && (self.min_col..=self.max_col).contains(&key.col);
        inside.then(|| CellKey::new(key.row - self.min_row, key.col - self.min_col))
    }
}

/// Result of a successful crop.
pub struct CropOutcome {
    pub state: ProjectState,
    pub base: ImageHandle,
    pub bounds: CellBounds,
}

/// Crop `state` to the bounding rectangle of `selection`.
///
/// Returns `Ok(None)` for an empty selection or one lying entirely outside
/// the grid. `state` itself is never modified; the caller swaps in the
/// returned state once it is ready.
pub fn crop_to_selection(
    state: &ProjectState,
    base: &ImageHandle,
    selection: &BTreeSet<CellKey>,
) -> Result<Option<CropOutcome>, DecodeError> {
    let in_grid: BTreeSet<CellKey> = selection
        .iter()
        .copied()
        .filter(|k| state.grid_config.contains(*k))
        .collect();
    let Some(bounds) = CellBounds::of(&in_grid) else {
        return Ok(None);
    };

    let layout = GridLayout::compute(
        state.grid_config,
        base.width(),
        base.height(),
        &state.cell_history,
    );
    let pixels = compositor::render_region(
        state,
        base,
        &layout,
        bounds.min_row..bounds.max_row + 1,
        bounds.min_col..bounds.max_col + 1,
    )?;
    let new_base = ImageHandle::from_image(pixels)?;
    let base_ref = new_base.to_data_uri()?;

    let grid_config = GridConfig {
        rows: bounds.rows(),
        cols: bounds.cols(),
    };
    let cell_history = CellHistory::remap(&state.cell_history, |k| bounds.translate(k));

    let mut cropped = state.clone();
    cropped.base_image_ref = Some(base_ref);
    cropped.grid_config = grid_config;
    cropped.cell_history = cell_history;

    log::info!(
        "Cropped to rows {}..={} cols {}..={} ({}x{} px)",
        bounds.min_row,
        bounds.max_row,
        bounds.min_col,
        bounds.max_col,
        new_base.width(),
        new_base.height()
    );

    Ok(Some(CropOutcome {
        state: cropped,
        base: new_base,
        bounds,
    }))
}

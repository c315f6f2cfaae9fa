// ============================================================================
// GRID OPS — regrid, manual replacement and revert
// ============================================================================

use crate::cell_history::CellVersion;
use crate::compositor::{self, RenderOptions};
use crate::error::{DecodeError, EditorError};
use crate::grid::{CellKey, GridConfig};
use crate::image_handle::{self, ImageHandle};
use crate::project::ProjectState;

/// Bake the current composite into a new base and switch to `grid`.
///
/// All cell history is discarded: the replacements now live in the base
/// pixels, resplit along the new grid.
pub fn regrid(
    state: &ProjectState,
    base: &ImageHandle,
    grid: GridConfig,
) -> Result<(ProjectState, ImageHandle), DecodeError> {
    let baked = compositor::render_image(state, base, &RenderOptions::export())?;
    let new_base = ImageHandle::from_image(baked)?;

    let mut next = state.clone();
    next.base_image_ref = Some(new_base.to_data_uri()?);
    next.grid_config = grid;
    next.cell_history.clear();

    log::info!(
        "Regridded {} -> {} ({}x{} px base)",
        state.grid_config,
        grid,
        new_base.width(),
        new_base.height()
    );
    Ok((next, new_base))
}

/// Decode user-supplied image bytes into a version with no prompt.
pub fn uploaded_version(bytes: &[u8]) -> Result<CellVersion, DecodeError> {
    let handle = ImageHandle::decode_bytes(bytes)?;
    Ok(CellVersion::from_decoded(
        image_handle::bytes_to_data_uri(bytes),
        &handle,
        None,
    ))
}

/// Reject keys outside the current grid.
pub fn check_cell(state: &ProjectState, key: CellKey) -> Result<(), EditorError> {
    if state.contains_cell(key) {
        Ok(())
    } else {
        Err(EditorError::CellOutOfRange(key.to_string()))
    }
}

// ============================================================================
// COMPOSITOR — base slices + replacement images → one RGBA canvas
// ============================================================================
//
// Cells are drawn row-major at the offsets of the adaptive GridLayout. All
// replacement images are decoded (in parallel) before the target is touched,
// so a decode failure never leaves a half-drawn canvas behind.

use std::collections::{BTreeSet, HashMap};

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::cell_history::CellHistory;
use crate::error::DecodeError;
use crate::grid::{CellKey, CellRect, GridLayout};
use crate::image_handle::ImageHandle;
use crate::project::ProjectState;

/// Fill drawn behind a native slice inside an enlarged cell.
pub const UNEXPANDED_FILL: Rgba<u8> = Rgba([0, 0, 0, 128]);
/// Fill drawn over every cell in the crop selection.
pub const SELECTION_FILL: Rgba<u8> = Rgba([79, 70, 229, 102]);
/// Grid line dash length (gap length is the same).
pub const GRID_DASH: u32 = 10;
/// Grid line thickness in pixels, centred on the cell boundary.
pub const GRID_LINE_WIDTH: u32 = 2;

const GRID_WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const GRID_BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Which overlays to draw on top of the cells.
#[derive(Clone, Copy, Debug)]
pub struct RenderOptions<'a> {
    /// Suppresses grid lines and the selection overlay.
    pub is_exporting: bool,
    pub show_selection: bool,
    pub crop_selection: Option<&'a BTreeSet<CellKey>>,
}

impl RenderOptions<'_> {
    /// Clean composite: no grid lines, no selection.
    pub fn export() -> Self {
        Self {
            is_exporting: true,
            show_selection: false,
            crop_selection: None,
        }
    }
}

impl<'a> RenderOptions<'a> {
    pub fn editing(crop_selection: Option<&'a BTreeSet<CellKey>>) -> Self {
        Self {
            is_exporting: false,
            show_selection: crop_selection.is_some_and(|s| !s.is_empty()),
            crop_selection,
        }
    }
}

/// Render `state` into `target`, resizing it to the composite's extents.
///
/// Returns the layout that was used so callers can map pixels back to cells.
pub fn render(
    target: &mut RgbaImage,
    state: &ProjectState,
    base: &ImageHandle,
    options: &RenderOptions<'_>,
) -> Result<GridLayout, DecodeError> {
    let grid = state.grid_config;
    let layout = GridLayout::compute(grid, base.width(), base.height(), &state.cell_history);
    let replacements = decode_replacements(&state.cell_history, grid.cells())?;

    *target = RgbaImage::new(layout.total_width(), layout.total_height());
    draw_cells(target, &layout, base, &replacements, 0..grid.rows, 0..grid.cols);

    if !options.is_exporting {
        if state.ui.show_grid {
            draw_grid_lines(target, &layout);
        }
        if options.show_selection
            && let Some(selection) = options.crop_selection
        {
            draw_selection(target, &layout, selection);
        }
    }

    Ok(layout)
}

/// Convenience wrapper returning a fresh canvas.
pub fn render_image(
    state: &ProjectState,
    base: &ImageHandle,
    options: &RenderOptions<'_>,
) -> Result<RgbaImage, DecodeError> {
    let mut canvas = RgbaImage::new(0, 0);
    render(&mut canvas, state, base, options)?;
    Ok(canvas)
}

/// Render the rectangle of cells `rows × cols` (half-open ranges into the
/// current grid) with the normal per-cell rule, into an image of exactly
/// that size. No overlays.
pub fn render_region(
    state: &ProjectState,
    base: &ImageHandle,
    layout: &GridLayout,
    rows: std::ops::Range<u32>,
    cols: std::ops::Range<u32>,
) -> Result<RgbaImage, DecodeError> {
    let region_cells = rows
        .clone()
        .flat_map(|r| cols.clone().map(move |c| CellKey::new(r, c)));
    let replacements = decode_replacements(&state.cell_history, region_cells)?;

    let width: u32 = layout.col_widths[cols.start as usize..cols.end as usize].iter().sum();
    let height: u32 = layout.row_heights[rows.start as usize..rows.end as usize].iter().sum();
    let mut out = RgbaImage::new(width, height);
    draw_cells(&mut out, layout, base, &replacements, rows, cols);
    Ok(out)
}

/// Render one cell at its allocated size, e.g. as the reference image for a
/// generation request.
pub fn render_cell(
    state: &ProjectState,
    base: &ImageHandle,
    key: CellKey,
) -> Result<Option<RgbaImage>, DecodeError> {
    if !state.grid_config.contains(key) {
        return Ok(None);
    }
    let layout = GridLayout::compute(
        state.grid_config,
        base.width(),
        base.height(),
        &state.cell_history,
    );
    render_region(state, base, &layout, key.row..key.row + 1, key.col..key.col + 1).map(Some)
}

fn decode_replacements(
    history: &CellHistory,
    cells: impl Iterator<Item = CellKey>,
) -> Result<HashMap<CellKey, ImageHandle>, DecodeError> {
    let wanted: Vec<_> = cells
        .filter_map(|key| history.latest(key).map(|v| (key, v)))
        .collect();
    wanted
        .into_par_iter()
        .map(|(key, version)| version.decode().map(|img| (key, img)))
        .collect()
}

/// Draw the cells of `rows × cols`, placing the top-left requested cell at
/// the target's origin.
fn draw_cells(
    target: &mut RgbaImage,
    layout: &GridLayout,
    base: &ImageHandle,
    replacements: &HashMap<CellKey, ImageHandle>,
    rows: std::ops::Range<u32>,
    cols: std::ops::Range<u32>,
) {
    let mut y = 0u32;
    for row in rows {
        let cell_h = layout.row_heights[row as usize];
        let mut x = 0u32;
        for col in cols.clone() {
            let cell_w = layout.col_widths[col as usize];
            let key = CellKey::new(row, col);
            let rect = CellRect {
                x,
                y,
                width: cell_w,
                height: cell_h,
            };
            match replacements.get(&key) {
                Some(img) => draw_stretched(target, img.pixels(), rect),
                None => draw_native_slice(target, base, layout, key, rect),
            }
            x += cell_w;
        }
        y += cell_h;
    }
}

fn draw_stretched(target: &mut RgbaImage, src: &RgbaImage, rect: CellRect) {
    if src.width() == 0 || src.height() == 0 {
        return;
    }
    if src.dimensions() == (rect.width, rect.height) {
        blit(target, src, rect.x, rect.y);
    } else {
        let scaled = imageops::resize(src, rect.width, rect.height, FilterType::Nearest);
        blit(target, &scaled, rect.x, rect.y);
    }
}

/// Native slice of the base image. In a cell enlarged by a sibling, the slice
/// sits centred at native resolution on a dark fill instead of being
/// upscaled.
fn draw_native_slice(
    target: &mut RgbaImage,
    base: &ImageHandle,
    layout: &GridLayout,
    key: CellKey,
    rect: CellRect,
) {
    let Some(native) = layout.native_rect(key) else {
        return;
    };
    let slice = imageops::crop_imm(base.pixels(), native.x, native.y, native.width, native.height).to_image();

    if layout.is_expanded(key) {
        fill_rect(target, rect, UNEXPANDED_FILL);
        let cx = rect.x + rect.width.saturating_sub(slice.width()) / 2;
        let cy = rect.y + rect.height.saturating_sub(slice.height()) / 2;
        blit(target, &slice, cx, cy);
    } else {
        draw_stretched(target, &slice, rect);
    }
}

/// Source-over composite of `src` onto `target` at `(x, y)`, clipped.
fn blit(target: &mut RgbaImage, src: &RgbaImage, x: u32, y: u32) {
    let w = src.width().min(target.width().saturating_sub(x));
    let h = src.height().min(target.height().saturating_sub(y));
    for sy in 0..h {
        for sx in 0..w {
            let dst = target.get_pixel_mut(x + sx, y + sy);
            *dst = blend_over(*dst, *src.get_pixel(sx, sy));
        }
    }
}

/// Source-over fill of a rectangle, clipped to the target.
fn fill_rect(target: &mut RgbaImage, rect: CellRect, color: Rgba<u8>) {
    let x_end = (rect.x + rect.width).min(target.width());
    let y_end = (rect.y + rect.height).min(target.height());
    for y in rect.y..y_end {
        for x in rect.x..x_end {
            let dst = target.get_pixel_mut(x, y);
            *dst = blend_over(*dst, color);
        }
    }
}

/// Straight-alpha "source over" for one pixel.
pub fn blend_over(base: Rgba<u8>, top: Rgba<u8>) -> Rgba<u8> {
    if top[3] == 0 {
        return base;
    }
    if top[3] == 255 || base[3] == 0 {
        return top;
    }

    let top_a = top[3] as f32 / 255.0;
    let base_a = base[3] as f32 / 255.0;
    let out_a = top_a + base_a * (1.0 - top_a);
    let channel = |t: u8, b: u8| {
        let v = (t as f32 * top_a + b as f32 * base_a * (1.0 - top_a)) / out_a;
        v.round().clamp(0.0, 255.0) as u8
    };
    Rgba([
        channel(top[0], base[0]),
        channel(top[1], base[1]),
        channel(top[2], base[2]),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}

/// Internal row/column boundaries as a two-pass dashed stroke: white dashes,
/// then black dashes shifted by one dash length, so the line alternates
/// black/white on any background.
fn draw_grid_lines(target: &mut RgbaImage, layout: &GridLayout) {
    let col_edges: Vec<u32> = layout.col_offsets().into_iter().skip(1).collect();
    let row_edges: Vec<u32> = layout.row_offsets().into_iter().skip(1).collect();

    for (color, dash_offset) in [(GRID_WHITE, 0), (GRID_BLACK, GRID_DASH)] {
        for &x in &col_edges {
            stroke_dashed(target, Axis::Vertical, x, color, dash_offset);
        }
        for &y in &row_edges {
            stroke_dashed(target, Axis::Horizontal, y, color, dash_offset);
        }
    }
}

#[derive(Clone, Copy)]
enum Axis {
    Vertical,
    Horizontal,
}

fn stroke_dashed(target: &mut RgbaImage, axis: Axis, at: u32, color: Rgba<u8>, dash_offset: u32) {
    let (w, h) = target.dimensions();
    let length = match axis {
        Axis::Vertical => h,
        Axis::Horizontal => w,
    };
    let first = at.saturating_sub(GRID_LINE_WIDTH / 2);
    for t in 0..length {
        if (t + dash_offset) % (2 * GRID_DASH) >= GRID_DASH {
            continue;
        }
        for across in first..first + GRID_LINE_WIDTH {
            let (x, y) = match axis {
                Axis::Vertical => (across, t),
                Axis::Horizontal => (t, across),
            };
            if x < w && y < h {
                target.put_pixel(x, y, color);
            }
        }
    }
}

fn draw_selection(target: &mut RgbaImage, layout: &GridLayout, selection: &BTreeSet<CellKey>) {
    for &key in selection {
        if let Some(rect) = layout.cell_rect(key) {
            fill_rect(target, rect, SELECTION_FILL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell_history::CellVersion;
    use crate::grid::GridConfig;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);

    fn solid(w: u32, h: u32, color: Rgba<u8>) -> ImageHandle {
        ImageHandle::from_image(RgbaImage::from_pixel(w, h, color)).unwrap()
    }

    fn version_of(img: &ImageHandle) -> CellVersion {
        CellVersion::from_ref(img.to_data_uri().unwrap(), None).unwrap()
    }

    /// 100×100 base whose quadrants are distinguishable by colour.
    fn quadrant_base() -> ImageHandle {
        let img = RgbaImage::from_fn(100, 100, |x, y| {
            Rgba([if x < 50 { 10 } else { 200 }, if y < 50 { 10 } else { 200 }, 99, 255])
        });
        ImageHandle::from_image(img).unwrap()
    }

    fn state_2x2() -> ProjectState {
        let mut state = ProjectState::new(GridConfig { rows: 2, cols: 2 });
        state.ui.show_grid = false;
        state
    }

    #[test]
    fn plain_grid_reproduces_the_base() {
        let base = quadrant_base();
        let out = render_image(&state_2x2(), &base, &RenderOptions::export()).unwrap();
        assert_eq!(&out, base.pixels());
    }

    #[test]
    fn uneven_base_exports_every_pixel() {
        let base = ImageHandle::from_image(RgbaImage::from_fn(101, 99, |x, y| {
            Rgba([x as u8, y as u8, (x + y) as u8, 255])
        }))
        .unwrap();
        for grid in [GridConfig { rows: 2, cols: 2 }, GridConfig { rows: 3, cols: 4 }] {
            let state = ProjectState::new(grid);
            let out = render_image(&state, &base, &RenderOptions::export()).unwrap();
            assert_eq!(&out, base.pixels(), "grid {grid}");
        }
    }

    #[test]
    fn tall_replacement_flags_its_unexpanded_sibling() {
        let base = quadrant_base();
        let mut state = state_2x2();
        let tall = solid(50, 80, GREEN);
        state.cell_history.append(CellKey::new(0, 0), version_of(&tall));

        let mut canvas = RgbaImage::new(1, 1);
        let layout = render(&mut canvas, &state, &base, &RenderOptions::export()).unwrap();
        assert_eq!(layout.row_heights, vec![80, 50]);
        assert_eq!(layout.col_widths, vec![50, 50]);
        assert_eq!(canvas.dimensions(), (100, 130));

        // (0,0) is the replacement, drawn at its own size.
        assert_eq!(*canvas.get_pixel(25, 70), GREEN);
        // (0,1): 15px of dark fill above and below a 50px native slice.
        assert_eq!(*canvas.get_pixel(75, 5), UNEXPANDED_FILL);
        assert_eq!(*canvas.get_pixel(75, 40), Rgba([200, 10, 99, 255]));
        assert_eq!(*canvas.get_pixel(75, 70), UNEXPANDED_FILL);
        // Second row is untouched native content.
        assert_eq!(*canvas.get_pixel(25, 100), Rgba([10, 200, 99, 255]));
    }

    #[test]
    fn replacement_is_stretched_to_fill_its_cell() {
        let base = quadrant_base();
        let mut state = state_2x2();
        // Narrow replacement in a column widened by another cell.
        state
            .cell_history
            .append(CellKey::new(0, 1), version_of(&solid(90, 50, RED)));
        state
            .cell_history
            .append(CellKey::new(1, 1), version_of(&solid(10, 10, GREEN)));

        let out = render_image(&state, &base, &RenderOptions::export()).unwrap();
        assert_eq!(out.dimensions(), (140, 100));
        for x in 50..140 {
            assert_eq!(*out.get_pixel(x, 75), GREEN);
        }
    }

    #[test]
    fn rendering_is_deterministic() {
        let base = quadrant_base();
        let mut state = state_2x2();
        state.ui.show_grid = true;
        state
            .cell_history
            .append(CellKey::new(1, 0), version_of(&solid(70, 30, RED)));
        let selection: BTreeSet<_> = [CellKey::new(0, 1)].into_iter().collect();
        let options = RenderOptions::editing(Some(&selection));

        let a = render_image(&state, &base, &options).unwrap();
        let b = render_image(&state, &base, &options).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn grid_lines_alternate_white_and_black_dashes() {
        let base = solid(100, 100, RED);
        let mut state = state_2x2();
        state.ui.show_grid = true;

        let out = render_image(&state, &base, &RenderOptions::editing(None)).unwrap();
        // Vertical boundary at x=50 covers columns 49 and 50.
        assert_eq!(*out.get_pixel(49, 0), GRID_WHITE);
        assert_eq!(*out.get_pixel(50, 9), GRID_WHITE);
        assert_eq!(*out.get_pixel(50, 10), GRID_BLACK);
        assert_eq!(*out.get_pixel(49, 19), GRID_BLACK);
        assert_eq!(*out.get_pixel(50, 20), GRID_WHITE);
        assert_eq!(*out.get_pixel(30, 30), RED);
        // No outer border.
        assert_eq!(*out.get_pixel(0, 30), RED);
    }

    #[test]
    fn export_suppresses_overlays() {
        let base = solid(100, 100, RED);
        let mut state = state_2x2();
        state.ui.show_grid = true;
        let selection: BTreeSet<_> = [CellKey::new(0, 0)].into_iter().collect();
        let options = RenderOptions {
            is_exporting: true,
            show_selection: true,
            crop_selection: Some(&selection),
        };
        let out = render_image(&state, &base, &options).unwrap();
        assert!(out.pixels().all(|p| *p == RED));
    }

    #[test]
    fn selection_tints_only_selected_cells() {
        let base = solid(100, 100, RED);
        let state = state_2x2();
        let selection: BTreeSet<_> = [CellKey::new(1, 1)].into_iter().collect();
        let out = render_image(&state, &base, &RenderOptions::editing(Some(&selection))).unwrap();

        assert_eq!(*out.get_pixel(75, 75), blend_over(RED, SELECTION_FILL));
        assert_ne!(*out.get_pixel(75, 75), RED);
        assert_eq!(*out.get_pixel(25, 25), RED);
    }

    #[test]
    fn undecodable_history_fails_without_touching_target() {
        let base = quadrant_base();
        let mut state = state_2x2();
        state
            .cell_history
            .append(CellKey::new(0, 0), CellVersion::sized_for_test(10, 10));

        let mut canvas = RgbaImage::from_pixel(3, 3, GREEN);
        let err = render(&mut canvas, &state, &base, &RenderOptions::export());
        assert!(err.is_err());
        assert_eq!(canvas, RgbaImage::from_pixel(3, 3, GREEN));
    }

    #[test]
    fn render_cell_matches_the_composite_region() {
        let base = quadrant_base();
        let mut state = state_2x2();
        state
            .cell_history
            .append(CellKey::new(0, 0), version_of(&solid(50, 80, GREEN)));

        let cell = render_cell(&state, &base, CellKey::new(0, 1)).unwrap().unwrap();
        let full = render_image(&state, &base, &RenderOptions::export()).unwrap();
        let region = imageops::crop_imm(&full, 50, 0, 50, 80).to_image();
        assert_eq!(cell, region);
        assert!(render_cell(&state, &base, CellKey::new(5, 5)).unwrap().is_none());
    }
}

// ============================================================================
// GRID — shape, cell addressing and adaptive layout extents
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cell_history::CellHistory;

/// Canonical partition of the base image into `rows × cols` source cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridConfig {
    pub rows: u32,
    pub cols: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self { rows: 2, cols: 2 }
    }
}

impl GridConfig {
    /// Returns `None` when either dimension is zero.
    pub fn new(rows: u32, cols: u32) -> Option<Self> {
        (rows >= 1 && cols >= 1).then_some(Self { rows, cols })
    }

    pub fn contains(&self, key: CellKey) -> bool {
        key.row < self.rows && key.col < self.cols
    }

    /// All cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = CellKey> + '_ {
        (0..self.rows).flat_map(move |row| (0..self.cols).map(move |col| CellKey::new(row, col)))
    }

    /// Native (un-expanded) column widths for a base image `base_width` wide.
    pub fn native_col_widths(&self, base_width: u32) -> Vec<u32> {
        native_spans(base_width, self.cols)
    }

    /// Native (un-expanded) row heights for a base image `base_height` tall.
    pub fn native_row_heights(&self, base_height: u32) -> Vec<u32> {
        native_spans(base_height, self.rows)
    }
}

/// Split `extent` pixels into `parts` spans: span `i` covers
/// `floor(i*extent/parts)..floor((i+1)*extent/parts)`, so the spans tile the
/// extent exactly. A span never drops below one pixel, which only matters
/// when `extent < parts`.
fn native_spans(extent: u32, parts: u32) -> Vec<u32> {
    let parts = u64::from(parts.max(1));
    let edge = |i: u64| (i * u64::from(extent) / parts) as u32;
    (0..parts).map(|i| (edge(i + 1) - edge(i)).max(1)).collect()
}

/// Grid presets are written `"{cols}x{rows}"`, e.g. `"3x2"` is three columns
/// by two rows.
impl FromStr for GridConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (cols, rows) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("invalid grid '{}': expected COLSxROWS", s))?;
        let cols: u32 = cols
            .trim()
            .parse()
            .map_err(|_| format!("invalid column count in '{}'", s))?;
        let rows: u32 = rows
            .trim()
            .parse()
            .map_err(|_| format!("invalid row count in '{}'", s))?;
        Self::new(rows, cols).ok_or_else(|| format!("grid '{}' must be at least 1x1", s))
    }
}

impl fmt::Display for GridConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// Zero-based `(row, col)` address of one cell. Serialized as `"{row}-{col}"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CellKey {
    pub row: u32,
    pub col: u32,
}

impl CellKey {
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.row, self.col)
    }
}

impl FromStr for CellKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| -> Option<u32> {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            part.parse().ok()
        };
        s.split_once('-')
            .and_then(|(row, col)| Some(Self::new(parse(row)?, parse(col)?)))
            .ok_or_else(|| s.to_string())
    }
}

impl TryFrom<String> for CellKey {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse().map_err(|bad| format!("invalid cell key '{}'", bad))
    }
}

impl From<CellKey> for String {
    fn from(key: CellKey) -> Self {
        key.to_string()
    }
}

/// Pixel rectangle of a cell inside the composite.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Per-column widths and per-row heights of the composite.
///
/// Every row shares one height and every column shares one width, so the
/// composite stays rectangular even when replacements have odd aspect ratios.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GridLayout {
    pub native_col_widths: Vec<u32>,
    pub native_row_heights: Vec<u32>,
    pub col_widths: Vec<u32>,
    pub row_heights: Vec<u32>,
}

impl GridLayout {
    /// Start from the native cell size and widen each row/column to its
    /// largest latest-version occupant.
    pub fn compute(
        grid: GridConfig,
        base_width: u32,
        base_height: u32,
        history: &CellHistory,
    ) -> Self {
        let native_col_widths = grid.native_col_widths(base_width);
        let native_row_heights = grid.native_row_heights(base_height);
        let mut col_widths = native_col_widths.clone();
        let mut row_heights = native_row_heights.clone();

        for (key, latest) in history.latest_entries() {
            if !grid.contains(key) {
                continue;
            }
            let col = &mut col_widths[key.col as usize];
            *col = (*col).max(latest.width());
            let row = &mut row_heights[key.row as usize];
            *row = (*row).max(latest.height());
        }

        Self {
            native_col_widths,
            native_row_heights,
            col_widths,
            row_heights,
        }
    }

    pub fn total_width(&self) -> u32 {
        self.col_widths.iter().sum()
    }

    pub fn total_height(&self) -> u32 {
        self.row_heights.iter().sum()
    }

    /// Left edge of every column.
    pub fn col_offsets(&self) -> Vec<u32> {
        running_offsets(&self.col_widths)
    }

    /// Top edge of every row.
    pub fn row_offsets(&self) -> Vec<u32> {
        running_offsets(&self.row_heights)
    }

    pub fn cell_rect(&self, key: CellKey) -> Option<CellRect> {
        let width = *self.col_widths.get(key.col as usize)?;
        let height = *self.row_heights.get(key.row as usize)?;
        Some(CellRect {
            x: self.col_widths[..key.col as usize].iter().sum(),
            y: self.row_heights[..key.row as usize].iter().sum(),
            width,
            height,
        })
    }

    /// Source rectangle of a cell's slice inside the base image.
    pub fn native_rect(&self, key: CellKey) -> Option<CellRect> {
        let width = *self.native_col_widths.get(key.col as usize)?;
        let height = *self.native_row_heights.get(key.row as usize)?;
        Some(CellRect {
            x: self.native_col_widths[..key.col as usize].iter().sum(),
            y: self.native_row_heights[..key.row as usize].iter().sum(),
            width,
            height,
        })
    }

    /// True when a sibling replacement forced this cell larger than native.
    pub fn is_expanded(&self, key: CellKey) -> bool {
        match (self.cell_rect(key), self.native_rect(key)) {
            (Some(cell), Some(native)) => cell.width > native.width || cell.height > native.height,
            _ => false,
        }
    }

    /// Which cell contains the composite pixel `(x, y)`.
    pub fn cell_at(&self, x: u32, y: u32) -> Option<CellKey> {
        let col = locate(&self.col_widths, x)?;
        let row = locate(&self.row_heights, y)?;
        Some(CellKey::new(row, col))
    }
}

fn running_offsets(extents: &[u32]) -> Vec<u32> {
    extents
        .iter()
        .scan(0u32, |acc, &e| {
            let start = *acc;
            *acc += e;
            Some(start)
        })
        .collect()
}

fn locate(extents: &[u32], pos: u32) -> Option<u32> {
    let mut edge = 0u32;
    for (i, &e) in extents.iter().enumerate() {
        edge += e;
        if pos < edge {
            return Some(i as u32);
        }
    }
    None
}

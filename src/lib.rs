//! GridFE: split an image into a grid, regenerate or replace individual
//! cells, and keep the adaptive composite renderable, undoable, croppable
//! and exportable.
//!
//! [`session::EditorSession`] is the entry point; everything else is the
//! machinery it drives.

pub mod cell_history;
pub mod cli;
pub mod compositor;
pub mod error;
pub mod grid;
pub mod history;
pub mod image_handle;
pub mod io;
pub mod logger;
pub mod ops;
pub mod project;
pub mod session;
pub mod settings;

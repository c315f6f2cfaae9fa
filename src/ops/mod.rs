pub mod crop;
pub mod generate;
pub mod grid_ops;

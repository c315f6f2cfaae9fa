use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use gridfe::cli::{self, CliArgs};
use gridfe::grid::{CellKey, GridConfig};
use gridfe::io;
use gridfe::settings::EditorSettings;
use image::{Rgba, RgbaImage};

fn write_png(path: &Path, w: u32, h: u32, color: Rgba<u8>) {
    RgbaImage::from_pixel(w, h, color).save(path).unwrap();
}

fn run(args: &[&str]) -> ExitCode {
    let args = CliArgs::try_parse_from(std::iter::once("gridfe").chain(args.iter().copied()))
        .unwrap();
    cli::run(args, EditorSettings::default())
}

#[test]
fn grid_arguments_parse_as_cols_by_rows() {
    let args = CliArgs::try_parse_from(["gridfe", "regrid", "p.json", "3x2"]).unwrap();
    match args.command {
        cli::CliCommand::Regrid { grid, .. } => assert_eq!(grid, GridConfig { rows: 2, cols: 3 }),
        other => panic!("unexpected command {:?}", other),
    }
    assert!(CliArgs::try_parse_from(["gridfe", "regrid", "p.json", "0x2"]).is_err());
    assert!(CliArgs::try_parse_from(["gridfe", "pop-cell", "p.json", "1_2"]).is_err());
    assert!(CliArgs::try_parse_from(["gridfe", "crop", "p.json"]).is_err());
}

#[test]
fn new_set_cell_crop_and_export() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("base.png");
    let tile = dir.path().join("tile.png");
    let project = dir.path().join("scene.json");
    let out = dir.path().join("scene.png");
    write_png(&base, 100, 100, Rgba([20, 40, 60, 255]));
    write_png(&tile, 50, 80, Rgba([0, 255, 0, 255]));

    let p = project.to_str().unwrap();
    let new = ["new", base.to_str().unwrap(), "-o", p, "--grid", "2x2", "--title", "Harbour"];
    assert_eq!(run(&new), ExitCode::SUCCESS);
    assert_eq!(run(&["set-cell", p, "0-0", tile.to_str().unwrap()]), ExitCode::SUCCESS);

    let loaded = io::load_project_file(&project).unwrap();
    assert_eq!(loaded.state.metadata.title, "Harbour");
    assert_eq!(loaded.state.cell_history.versions(CellKey::new(0, 0)).len(), 1);

    assert_eq!(run(&["crop", p, "0-0", "0-1"]), ExitCode::SUCCESS);
    let cropped = io::load_project_file(&project).unwrap();
    assert_eq!(cropped.state.grid_config, GridConfig { rows: 1, cols: 2 });
    assert_eq!(cropped.base.dimensions(), (100, 80));
    assert!(cropped.state.metadata.date_modified.is_some());

    assert_eq!(run(&["export", p, "-o", out.to_str().unwrap()]), ExitCode::SUCCESS);
    let exported = image::open(&out).unwrap().to_rgba8();
    assert_eq!(exported.dimensions(), (100, 80));
    assert_eq!(*exported.get_pixel(10, 10), Rgba([0, 255, 0, 255]));
}

#[test]
fn failing_edit_leaves_the_file_alone() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("base.png");
    let project = dir.path().join("scene.json");
    write_png(&base, 40, 40, Rgba([1, 2, 3, 255]));

    let p = project.to_str().unwrap();
    assert_eq!(run(&["new", base.to_str().unwrap(), "-o", p]), ExitCode::SUCCESS);
    let before = std::fs::read(&project).unwrap();

    // Out of range for the default 2x2 grid.
    assert_eq!(run(&["pop-cell", p, "5-5"]), ExitCode::FAILURE);
    // Not an image.
    assert_eq!(run(&["set-cell", p, "0-0", p]), ExitCode::FAILURE);
    // No provider and no key.
    assert_eq!(run(&["generate", p, "0-0", "a boat"]), ExitCode::FAILURE);

    assert_eq!(std::fs::read(&project).unwrap(), before);
}

#[test]
fn export_defaults_to_title_slug_next_to_project() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("base.png");
    let project = dir.path().join("scene.json");
    write_png(&base, 30, 30, Rgba([9, 9, 9, 255]));

    let p = project.to_str().unwrap();
    let new = ["new", base.to_str().unwrap(), "-o", p, "--title", "Night Sky"];
    assert_eq!(run(&new), ExitCode::SUCCESS);
    assert_eq!(run(&["export", p, "--format", "jpeg", "--quality", "80"]), ExitCode::SUCCESS);

    let exported = dir.path().join("night-sky.jpg");
    let image = image::open(&exported).unwrap();
    assert_eq!((image.width(), image.height()), (30, 30));
}

#[test]
fn new_rejects_oversized_grid() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("base.png");
    let project = dir.path().join("scene.json");
    write_png(&base, 20, 20, Rgba([5, 5, 5, 255]));

    let new = ["new", base.to_str().unwrap(), "-o", project.to_str().unwrap(), "--grid", "2000x1"];
    assert_eq!(run(&new), ExitCode::FAILURE);
    assert!(!project.exists());
}

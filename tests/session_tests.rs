use std::collections::BTreeSet;

use gridfe::compositor::{self, RenderOptions, UNEXPANDED_FILL};
use gridfe::error::{EditorError, GenerationError, ProjectFileError};
use gridfe::grid::{CellKey, GridConfig, GridLayout};
use gridfe::image_handle;
use gridfe::ops::generate::{GenerationRequest, NoGenerator};
use gridfe::session::{Command, EditorSession, MetadataEdit, RenderInstruction, labels};
use gridfe::settings::EditorSettings;
use image::{Rgba, RgbaImage};

fn png(w: u32, h: u32, color: Rgba<u8>) -> Vec<u8> {
    image_handle::encode_png(&RgbaImage::from_pixel(w, h, color)).unwrap()
}

/// 100×100 base with distinguishable quadrants.
fn quadrant_png() -> Vec<u8> {
    let img = RgbaImage::from_fn(100, 100, |x, y| {
        Rgba([if x < 50 { 10 } else { 200 }, if y < 50 { 10 } else { 200 }, 99, 255])
    });
    image_handle::encode_png(&img).unwrap()
}

fn session_with_base() -> EditorSession {
    let mut session = EditorSession::new(EditorSettings::default());
    session
        .dispatch(Command::LoadBaseImage { bytes: quadrant_png() }, &NoGenerator)
        .unwrap();
    session
}

fn upload(session: &mut EditorSession, key: CellKey, bytes: Vec<u8>) {
    session.dispatch(Command::SelectCell(key), &NoGenerator).unwrap();
    session
        .dispatch(Command::UploadReplacement { bytes }, &NoGenerator)
        .unwrap();
}

#[test]
fn undo_restores_pre_action_state_and_redo_reapplies_it() {
    let mut session = session_with_base();
    let before = session.state().clone();

    upload(&mut session, CellKey::new(0, 0), png(50, 80, Rgba([0, 255, 0, 255])));
    let after = session.state().clone();
    assert_ne!(before, after);
    assert_eq!(session.history().undo_label(), Some(labels::UPLOAD_IMAGE));

    assert_eq!(
        session.dispatch(Command::Undo, &NoGenerator).unwrap(),
        RenderInstruction::Redraw
    );
    assert_eq!(session.state(), &before);

    session.dispatch(Command::Redo, &NoGenerator).unwrap();
    assert_eq!(session.state(), &after);
}

#[test]
fn new_action_after_undo_discards_redo() {
    let mut session = session_with_base();
    upload(&mut session, CellKey::new(0, 0), png(10, 10, Rgba([1, 1, 1, 255])));
    session.dispatch(Command::Undo, &NoGenerator).unwrap();

    session
        .dispatch(Command::EditMetadata(MetadataEdit::Title("Second".into())), &NoGenerator)
        .unwrap();
    let current = session.state().clone();
    assert_eq!(
        session.dispatch(Command::Redo, &NoGenerator).unwrap(),
        RenderInstruction::None
    );
    assert_eq!(session.state(), &current);
    assert!(!session.state().cell_history.has(CellKey::new(0, 0)));
}

#[test]
fn undo_at_the_initial_state_is_a_no_op() {
    let mut session = session_with_base();
    assert_eq!(
        session.dispatch(Command::Undo, &NoGenerator).unwrap(),
        RenderInstruction::None
    );
    assert!(session.has_project());
}

#[test]
fn undo_leaves_crop_mode() {
    let mut session = session_with_base();
    upload(&mut session, CellKey::new(1, 1), png(5, 5, Rgba([1, 2, 3, 255])));
    session.dispatch(Command::ToggleCropMode, &NoGenerator).unwrap();
    session
        .dispatch(Command::ToggleCropCell(CellKey::new(0, 0)), &NoGenerator)
        .unwrap();
    assert!(session.crop_mode());

    session.dispatch(Command::Undo, &NoGenerator).unwrap();
    assert!(!session.crop_mode());
    assert!(session.crop_selection().is_empty());
}

#[test]
fn tall_replacement_drives_row_height_and_sibling_overlay() {
    let mut session = session_with_base();
    upload(&mut session, CellKey::new(0, 0), png(50, 80, Rgba([0, 255, 0, 255])));

    let layout = session.layout().unwrap();
    assert_eq!(layout.row_heights, vec![80, 50]);
    assert_eq!(layout.col_widths, vec![50, 50]);

    let out = session.render_export().unwrap();
    assert_eq!(out.dimensions(), (100, 130));
    assert_eq!(*out.get_pixel(75, 10), UNEXPANDED_FILL);
    assert_eq!(*out.get_pixel(75, 40), Rgba([200, 10, 99, 255]));
}

#[test]
fn popping_the_only_version_matches_never_replaced() {
    let mut untouched = session_with_base();
    let mut session = session_with_base();
    upload(&mut session, CellKey::new(1, 0), png(70, 20, Rgba([9, 9, 9, 255])));
    session.dispatch(Command::RevertCell, &NoGenerator).unwrap();

    assert_eq!(session.state().cell_history, untouched.state().cell_history);
    assert_eq!(session.layout(), untouched.layout());
    assert_eq!(session.render().unwrap(), untouched.render().unwrap());
    assert_eq!(session.history().undo_label(), Some(labels::REVERT_CELL));

    // Reverting a cell without history records nothing.
    untouched
        .dispatch(Command::SelectCell(CellKey::new(0, 0)), &NoGenerator)
        .unwrap();
    let len = untouched.history().len();
    assert_eq!(
        untouched.dispatch(Command::RevertCell, &NoGenerator).unwrap(),
        RenderInstruction::None
    );
    assert_eq!(untouched.history().len(), len);
}

#[test]
fn crop_keeps_selected_rectangle_and_history() {
    let mut session = session_with_base();
    upload(&mut session, CellKey::new(0, 0), png(50, 80, Rgba([0, 255, 0, 255])));
    let original = session.state().cell_history.versions(CellKey::new(0, 0)).to_vec();

    session.dispatch(Command::ToggleCropMode, &NoGenerator).unwrap();
    for key in [CellKey::new(0, 0), CellKey::new(0, 1)] {
        session.dispatch(Command::ToggleCropCell(key), &NoGenerator).unwrap();
    }
    session.dispatch(Command::Crop, &NoGenerator).unwrap();

    let state = session.state();
    assert_eq!(state.grid_config, GridConfig { rows: 1, cols: 2 });
    assert_eq!(state.cell_history.versions(CellKey::new(0, 0)), original.as_slice());
    assert!(!state.cell_history.has(CellKey::new(0, 1)));
    assert_eq!(session.base().unwrap().dimensions(), (100, 80));
    assert!(!session.crop_mode());
    assert_eq!(session.history().undo_label(), Some(labels::CROP_IMAGE));

    // The un-replaced cell shows a resplit of the baked composite: its
    // native slice is now the right half of the 100×80 base.
    let layout = session.layout().unwrap();
    assert_eq!(layout.col_widths, vec![50, 50]);
    assert_eq!(layout.row_heights, vec![80]);

    session.dispatch(Command::Undo, &NoGenerator).unwrap();
    assert_eq!(session.state().grid_config, GridConfig { rows: 2, cols: 2 });
    assert_eq!(session.base().unwrap().dimensions(), (100, 100));
}

#[test]
fn crop_with_empty_selection_is_ignored() {
    let mut session = session_with_base();
    let len = session.history().len();
    assert_eq!(
        session.dispatch(Command::Crop, &NoGenerator).unwrap(),
        RenderInstruction::None
    );
    assert_eq!(session.history().len(), len);
}

#[test]
fn change_grid_bakes_and_resets_history() {
    let mut session = session_with_base();
    upload(&mut session, CellKey::new(1, 1), png(50, 50, Rgba([5, 6, 7, 255])));
    session
        .dispatch(Command::ChangeGrid(GridConfig { rows: 1, cols: 4 }), &NoGenerator)
        .unwrap();

    assert!(session.state().cell_history.is_empty());
    assert_eq!(session.state().grid_config, GridConfig { rows: 1, cols: 4 });
    assert_eq!(*session.base().unwrap().pixels().get_pixel(75, 75), Rgba([5, 6, 7, 255]));
    // The cell selected under the old grid no longer exists.
    assert_eq!(session.active_cell(), None);
    assert_eq!(session.history().undo_label(), Some(labels::CHANGE_GRID));
}

#[test]
fn generation_appends_with_raw_prompt() {
    let mut session = session_with_base();
    session.dispatch(Command::SetApiKey("k".into()), &NoGenerator).unwrap();
    session
        .dispatch(Command::SelectCell(CellKey::new(1, 0)), &NoGenerator)
        .unwrap();

    let generator = |req: &GenerationRequest| -> Result<Vec<u8>, GenerationError> {
        assert!(req.prompt.starts_with("a castle; "));
        Ok(png(64, 64, Rgba([255, 0, 255, 255])))
    };
    session
        .dispatch(Command::Generate { prompt: "a castle".into() }, &generator)
        .unwrap();

    let latest = session.state().cell_history.latest(CellKey::new(1, 0)).unwrap();
    assert_eq!(latest.prompt_text(), Some("a castle"));
    assert_eq!((latest.width(), latest.height()), (64, 64));
    assert_eq!(session.history().undo_label(), Some(labels::AI_GENERATE));
    assert!(!session.is_generating());
}

#[test]
fn failed_generation_changes_nothing() {
    let mut session = session_with_base();
    session
        .dispatch(Command::SelectCell(CellKey::new(0, 1)), &NoGenerator)
        .unwrap();
    let state = session.state().clone();
    let labels_before: Vec<String> = session.history().labels().iter().map(|s| s.to_string()).collect();

    // No key configured anywhere.
    assert!(matches!(
        session.dispatch(Command::Generate { prompt: "x".into() }, &NoGenerator),
        Err(EditorError::Generation(GenerationError::MissingCredentials))
    ));

    session.dispatch(Command::SetApiKey("k".into()), &NoGenerator).unwrap();
    let state = {
        let mut s = state;
        s.ui.api_key = "k".into();
        s
    };
    let rejecting = |_: &GenerationRequest| -> Result<Vec<u8>, GenerationError> {
        Err(GenerationError::Rejected("quota exceeded".into()))
    };
    assert!(session
        .dispatch(Command::Generate { prompt: "x".into() }, &rejecting)
        .is_err());

    assert_eq!(session.state(), &state);
    assert_eq!(session.history().labels(), labels_before);
    assert!(!session.is_generating());
}

#[test]
fn history_cap_comes_from_settings() {
    let settings = EditorSettings {
        max_undo_steps: 3,
        ..EditorSettings::default()
    };
    let mut session = EditorSession::new(settings);
    session
        .dispatch(Command::LoadBaseImage { bytes: quadrant_png() }, &NoGenerator)
        .unwrap();
    for i in 0..6 {
        session
            .dispatch(Command::EditMetadata(MetadataEdit::VersionNote(format!("v{i}"))), &NoGenerator)
            .unwrap();
    }
    assert_eq!(session.history().len(), 3);
    session.dispatch(Command::Undo, &NoGenerator).unwrap();
    session.dispatch(Command::Undo, &NoGenerator).unwrap();
    assert!(!session.history().can_undo());
    assert_eq!(session.state().metadata.version_note, "v3");
}

#[test]
fn invalid_project_leaves_open_project_untouched() {
    let mut session = session_with_base();
    upload(&mut session, CellKey::new(0, 1), png(12, 12, Rgba([4, 4, 4, 255])));
    let state = session.state().clone();
    let history_len = session.history().len();

    let json = r#"{ "baseImageRef": "data:image/png;base64,AAAA", "gridConfig": { "rows": 1, "cols": 1 } }"#;
    let err = session.dispatch(Command::LoadProject { json: json.into() }, &NoGenerator);
    assert!(matches!(
        err,
        Err(EditorError::ProjectFile(ProjectFileError::MissingField("metadata")))
    ));
    assert_eq!(session.state(), &state);
    assert_eq!(session.history().len(), history_len);
    assert!(session.render().unwrap().is_some());
}

#[test]
fn saved_project_reopens_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scene.json");

    let mut session = session_with_base();
    upload(&mut session, CellKey::new(0, 0), png(30, 70, Rgba([8, 8, 8, 255])));
    session
        .dispatch(Command::EditMetadata(MetadataEdit::Author("Ada".into())), &NoGenerator)
        .unwrap();
    session.save_to(&path).unwrap();
    assert!(session.state().metadata.date_modified.is_some());

    let reopened = EditorSession::open_file(&path, EditorSettings::default()).unwrap();
    assert_eq!(reopened.state(), session.state());
    assert_eq!(reopened.render().unwrap(), session.render().unwrap());
    assert_eq!(reopened.history().labels(), vec![labels::OPEN_PROJECT]);
    assert_ne!(reopened.id, session.id);
}

#[test]
fn rendering_twice_is_identical_and_matches_the_compositor() {
    let mut session = session_with_base();
    upload(&mut session, CellKey::new(1, 1), png(90, 15, Rgba([100, 0, 0, 255])));
    session.dispatch(Command::ToggleCropMode, &NoGenerator).unwrap();
    session
        .dispatch(Command::ToggleCropCell(CellKey::new(0, 1)), &NoGenerator)
        .unwrap();

    let a = session.render().unwrap().unwrap();
    let b = session.render().unwrap().unwrap();
    assert_eq!(a, b);

    let selection: BTreeSet<_> = [CellKey::new(0, 1)].into_iter().collect();
    let direct = compositor::render_image(
        session.state(),
        session.base().unwrap(),
        &RenderOptions::editing(Some(&selection)),
    )
    .unwrap();
    assert_eq!(a, direct);

    let layout = GridLayout::compute(session.state().grid_config, 100, 100, &session.state().cell_history);
    assert_eq!((a.width(), a.height()), (layout.total_width(), layout.total_height()));
}

#[test]
fn unsupported_grid_is_rejected_before_baking() {
    let mut session = session_with_base();
    let state = session.state().clone();
    for grid in [GridConfig { rows: 0, cols: 3 }, GridConfig { rows: 2, cols: 5000 }] {
        assert!(matches!(
            session.dispatch(Command::ChangeGrid(grid), &NoGenerator),
            Err(EditorError::InvalidGrid { .. })
        ));
    }
    assert_eq!(session.state(), &state);
    assert_eq!(session.history().len(), 1);
}

#[test]
fn uneven_base_survives_export_and_repeated_regrids() {
    let base = RgbaImage::from_fn(101, 99, |x, y| Rgba([x as u8, y as u8, 50, 255]));
    let mut session = EditorSession::new(EditorSettings::default());
    session
        .dispatch(
            Command::LoadBaseImage { bytes: image_handle::encode_png(&base).unwrap() },
            &NoGenerator,
        )
        .unwrap();
    assert_eq!(session.render_export().unwrap(), base);

    for grid in [GridConfig { rows: 3, cols: 3 }, GridConfig { rows: 2, cols: 4 }] {
        session.dispatch(Command::ChangeGrid(grid), &NoGenerator).unwrap();
        assert_eq!(session.base().unwrap().pixels(), &base, "after regrid to {grid}");
    }
}

#[test]
fn unsupported_default_grid_is_rejected_on_load() {
    let settings = EditorSettings {
        default_grid: GridConfig { rows: 1, cols: 2000 },
        ..EditorSettings::default()
    };
    let mut session = EditorSession::new(settings);
    assert!(matches!(
        session.dispatch(Command::LoadBaseImage { bytes: quadrant_png() }, &NoGenerator),
        Err(EditorError::InvalidGrid { rows: 1, cols: 2000 })
    ));
    assert!(!session.has_project());
    assert!(session.history().is_empty());
}

#[test]
fn failed_save_leaves_modified_date_alone() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session_with_base();
    let missing_dir = dir.path().join("missing").join("scene.json");

    assert!(session.save_to(&missing_dir).is_err());
    assert_eq!(session.state().metadata.date_modified, None);

    let path = dir.path().join("scene.json");
    session.save_to(&path).unwrap();
    assert!(session.state().metadata.date_modified.is_some());
}

// ============================================================================
// GridFE CLI — headless project editing via command-line subcommands
// ============================================================================
//
// Usage examples:
//   gridfe new photo.png -o scene.json --grid 3x2 --title "Harbour"
//   gridfe info scene.json
//   gridfe set-cell scene.json 0-1 boat.png
//   gridfe generate scene.json 1-2 "a red lighthouse" --provider ./gen.sh
//   gridfe crop scene.json 0-0 0-1
//   gridfe export scene.json -o harbour.jpg --quality 85
//
// Every editing subcommand opens the project file, dispatches session
// commands and writes the project back (or to --output).

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};

use crate::error::EditorError;
use crate::grid::{CellKey, GridConfig};
use crate::io::{self, ExportFormat};
use crate::ops::generate::{ImageGenerator, NoGenerator, ProcessGenerator};
use crate::session::{Command, EditorSession, MetadataEdit};
use crate::settings::EditorSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// GridFE headless grid editor.
#[derive(Parser, Debug)]
#[command(
    name = "gridfe",
    about = "GridFE headless grid image editor",
    long_about = "Split an image into a grid, replace or regenerate individual cells,\n\
                  crop to a block of cells and export the composite, all from the\n\
                  command line. Projects are stored as JSON files.\n\n\
                  Example:\n  \
                  gridfe new photo.png -o scene.json --grid 3x2\n  \
                  gridfe set-cell scene.json 0-1 boat.png\n  \
                  gridfe export scene.json -o scene.png"
)]
pub struct CliArgs {
    /// Settings file to use instead of the platform default.
    #[arg(long, global = true, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// Log debug output and print timing information.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Create a project from a base image.
    New {
        image: PathBuf,
        /// Project file to write.
        #[arg(short, long, value_name = "FILE.json")]
        output: PathBuf,
        /// Grid as COLSxROWS (default from settings).
        #[arg(short, long, value_name = "COLSxROWS")]
        grid: Option<GridConfig>,
        #[arg(long)]
        title: Option<String>,
    },
    /// Print a project summary.
    Info { project: PathBuf },
    /// Render the editing view (grid lines per the project's setting).
    Render {
        project: PathBuf,
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
        /// Highlight these cells as a crop selection.
        #[arg(long, value_name = "ROW-COL", num_args = 1..)]
        select: Vec<CellKey>,
    },
    /// Export the clean composite.
    Export {
        project: PathBuf,
        /// Output file; defaults to `<title slug>.<ext>` next to the project.
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
        /// png or jpeg; inferred from --output when omitted.
        #[arg(short, long)]
        format: Option<ExportFormat>,
        /// JPEG quality (1–100).
        #[arg(short, long, value_name = "1-100")]
        quality: Option<u8>,
    },
    /// Bake the composite and switch to a new grid.
    Regrid {
        project: PathBuf,
        #[arg(value_name = "COLSxROWS")]
        grid: GridConfig,
        #[arg(short, long, value_name = "FILE.json")]
        output: Option<PathBuf>,
    },
    /// Add an image file as a new version of a cell.
    SetCell {
        project: PathBuf,
        #[arg(value_name = "ROW-COL")]
        cell: CellKey,
        image: PathBuf,
        #[arg(short, long, value_name = "FILE.json")]
        output: Option<PathBuf>,
    },
    /// Remove the latest version of a cell.
    PopCell {
        project: PathBuf,
        #[arg(value_name = "ROW-COL")]
        cell: CellKey,
        #[arg(short, long, value_name = "FILE.json")]
        output: Option<PathBuf>,
    },
    /// Crop to the bounding rectangle of the given cells.
    Crop {
        project: PathBuf,
        #[arg(value_name = "ROW-COL", required = true, num_args = 1..)]
        cells: Vec<CellKey>,
        #[arg(short, long, value_name = "FILE.json")]
        output: Option<PathBuf>,
    },
    /// Regenerate a cell through the configured provider program.
    Generate {
        project: PathBuf,
        #[arg(value_name = "ROW-COL")]
        cell: CellKey,
        prompt: String,
        /// Provider program (default from settings).
        #[arg(long, value_name = "PROGRAM")]
        provider: Option<PathBuf>,
        /// API key to store in the project before generating.
        #[arg(long)]
        api_key: Option<String>,
        #[arg(short, long, value_name = "FILE.json")]
        output: Option<PathBuf>,
    },
}

// ============================================================================
// Public entry point
// ============================================================================

/// Load the settings named on the command line, or the platform defaults.
pub fn load_settings(args: &CliArgs) -> EditorSettings {
    match &args.settings {
        Some(path) => EditorSettings::load_from(path),
        None => EditorSettings::load(),
    }
}

/// Run one subcommand and return an OS exit code.
/// `0` = success, `1` = failure (reason on stderr and in the session log).
pub fn run(args: CliArgs, settings: EditorSettings) -> ExitCode {
    let start = Instant::now();
    let verbose = args.verbose;
    match execute(args.command, settings) {
        Ok(()) => {
            if verbose {
                println!("done in {:.0?}", start.elapsed());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn execute(command: CliCommand, settings: EditorSettings) -> Result<(), EditorError> {
    match command {
        CliCommand::New {
            image,
            output,
            grid,
            title,
        } => {
            let mut settings = settings;
            if let Some(grid) = grid {
                settings.default_grid = grid;
            }
            let bytes = io::read_image_bytes(&image)?;
            let mut session = EditorSession::new(settings);
            session.dispatch(Command::LoadBaseImage { bytes }, &NoGenerator)?;
            if let Some(title) = title {
                session.dispatch(Command::EditMetadata(MetadataEdit::Title(title)), &NoGenerator)?;
            }
            session.save_to(&output)?;
            println!("{}", output.display());
            Ok(())
        }
        CliCommand::Info { project } => {
            let session = EditorSession::open_file(&project, settings)?;
            print_info(&session);
            Ok(())
        }
        CliCommand::Render {
            project,
            output,
            select,
        } => {
            let mut session = EditorSession::open_file(&project, settings)?;
            if !select.is_empty() {
                session.dispatch(Command::ToggleCropMode, &NoGenerator)?;
                for key in select {
                    session.dispatch(Command::ToggleCropCell(key), &NoGenerator)?;
                }
            }
            let image = session.render()?.ok_or(EditorError::NoProject)?;
            let format = ExportFormat::from_path(&output).unwrap_or_default();
            io::encode_and_write(&image, &output, format, session.settings().jpeg_quality)?;
            println!("{}", output.display());
            Ok(())
        }
        CliCommand::Export {
            project,
            output,
            format,
            quality,
        } => {
            let mut settings = settings;
            if let Some(format) = format {
                settings.export_format = format;
            }
            if let Some(quality) = quality {
                settings.jpeg_quality = quality.clamp(1, 100);
            }
            let session = EditorSession::open_file(&project, settings)?;
            let output = output.unwrap_or_else(|| sibling(&project, &session.export_file_name()));
            let image = session.render_export()?;
            let format = match format {
                Some(f) => f,
                None => ExportFormat::from_path(&output).unwrap_or(session.settings().export_format),
            };
            io::encode_and_write(&image, &output, format, session.settings().jpeg_quality)?;
            println!("{}", output.display());
            Ok(())
        }
        CliCommand::Regrid {
            project,
            grid,
            output,
        } => edit_project(&project, output, settings, &NoGenerator, vec![Command::ChangeGrid(grid)]),
        CliCommand::SetCell {
            project,
            cell,
            image,
            output,
        } => {
            let bytes = io::read_image_bytes(&image)?;
            let commands = vec![
                Command::SelectCell(cell),
                Command::UploadReplacement { bytes },
            ];
            edit_project(&project, output, settings, &NoGenerator, commands)
        }
        CliCommand::PopCell {
            project,
            cell,
            output,
        } => {
            let commands = vec![Command::SelectCell(cell), Command::RevertCell];
            edit_project(&project, output, settings, &NoGenerator, commands)
        }
        CliCommand::Crop {
            project,
            cells,
            output,
        } => {
            let mut commands = vec![Command::ToggleCropMode];
            commands.extend(cells.into_iter().map(Command::ToggleCropCell));
            commands.push(Command::Crop);
            edit_project(&project, output, settings, &NoGenerator, commands)
        }
        CliCommand::Generate {
            project,
            cell,
            prompt,
            provider,
            api_key,
            output,
        } => {
            let program = provider.or_else(|| {
                let configured = settings.generator_program.trim();
                (!configured.is_empty()).then(|| PathBuf::from(configured))
            });
            let generator: Box<dyn ImageGenerator> = match program {
                Some(program) => Box::new(ProcessGenerator::new(program)),
                None => Box::new(NoGenerator),
            };
            let mut commands = Vec::new();
            if let Some(key) = api_key {
                commands.push(Command::SetApiKey(key));
            }
            commands.push(Command::SelectCell(cell));
            commands.push(Command::Generate { prompt });
            edit_project(&project, output, settings, generator.as_ref(), commands)
        }
    }
}

/// Open, apply `commands` in order, save. Nothing is written if any
/// command fails.
fn edit_project(
    project: &Path,
    output: Option<PathBuf>,
    settings: EditorSettings,
    generator: &dyn ImageGenerator,
    commands: Vec<Command>,
) -> Result<(), EditorError> {
    let mut session = EditorSession::open_file(project, settings)?;
    for command in commands {
        session.dispatch(command, generator)?;
    }
    let output = output.unwrap_or_else(|| project.to_path_buf());
    session.save_to(&output)?;
    println!("{}", output.display());
    Ok(())
}

fn sibling(project: &Path, file_name: &str) -> PathBuf {
    project
        .parent()
        .map(|dir| dir.join(file_name))
        .unwrap_or_else(|| PathBuf::from(file_name))
}

fn print_info(session: &EditorSession) {
    let state = session.state();
    let meta = &state.metadata;
    println!("Title:        {}", state.display_title());
    if !meta.author.is_empty() {
        println!("Author:       {}", meta.author);
    }
    if !meta.description.is_empty() {
        println!("Description:  {}", meta.description);
    }
    println!("Version note: {}", meta.version_note);
    if let Some(created) = meta.date_created {
        println!("Created:      {}", created.to_rfc3339());
    }
    if let Some(modified) = meta.date_modified {
        println!("Modified:     {}", modified.to_rfc3339());
    }
    println!("Grid:         {} ({} columns x {} rows)", state.grid_config, state.grid_config.cols, state.grid_config.rows);
    if let (Some(base), Some(layout)) = (session.base(), session.layout()) {
        println!("Base image:   {}x{}", base.width(), base.height());
        println!("Composite:    {}x{}", layout.total_width(), layout.total_height());
    }
    for assist in &meta.prompt_assists {
        println!("Assist:       [{}] {}", if assist.enabled { "x" } else { " " }, assist.text);
    }
    println!("Replaced cells: {}", state.cell_history.len());
    for (key, latest) in state.cell_history.latest_entries() {
        println!(
            "  {}  {} version(s), latest {}x{}  {}",
            key,
            state.cell_history.versions(key).len(),
            latest.width(),
            latest.height(),
            latest.prompt_text().unwrap_or("(uploaded)")
        );
    }
}

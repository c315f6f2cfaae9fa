use std::path::{Path, PathBuf};

use crate::grid::GridConfig;
use crate::io::ExportFormat;

/// Editor settings that persist across sessions
#[derive(Clone, Debug, PartialEq)]
pub struct EditorSettings {
    /// Grid used for a newly loaded base image
    pub default_grid: GridConfig,
    /// Maximum number of undo steps (0 = unlimited)
    pub max_undo_steps: usize,
    /// Format used by `export` when the output path does not decide it
    pub export_format: ExportFormat,
    /// JPEG quality, 1–100
    pub jpeg_quality: u8,
    /// Fallback key for the generation provider when the project has none
    pub api_key: String,
    /// Program run for AI generation (empty = none configured)
    pub generator_program: String,
    pub log_level: log::LevelFilter,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            default_grid: GridConfig::default(),
            max_undo_steps: 50,
            export_format: ExportFormat::Png,
            jpeg_quality: 90,
            api_key: String::new(),
            generator_program: String::new(),
            log_level: log::LevelFilter::Info,
        }
    }
}

impl EditorSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/gridfe/gridfe_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\GridFE\gridfe_settings.cfg
    /// On macOS:   ~/Library/Application Support/GridFE/gridfe_settings.cfg
    /// Fallback:   same directory as the executable.
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("gridfe");
            let _ = std::fs::create_dir_all(&config_dir);
            return Some(config_dir.join("gridfe_settings.cfg"));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .unwrap_or_default();
            let config_dir = PathBuf::from(appdata).join("GridFE");
            let _ = std::fs::create_dir_all(&config_dir);
            return Some(config_dir.join("gridfe_settings.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
            let config_dir = PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("GridFE");
            let _ = std::fs::create_dir_all(&config_dir);
            return Some(config_dir.join("gridfe_settings.cfg"));
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join("gridfe_settings.cfg")))
        }
    }

    /// Load from the platform settings file (defaults if missing or corrupt)
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.to_config_string())
    }

    /// Parse `key=value` lines. Unknown keys and unparsable values are
    /// ignored, leaving the default in place.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "default_grid" => {
                    if let Ok(grid) = val.parse()
                        && crate::io::grid_in_bounds(grid)
                    {
                        s.default_grid = grid;
                    }
                }
                "max_undo_steps" => {
                    s.max_undo_steps = val.parse().unwrap_or(50);
                }
                "export_format" => {
                    s.export_format = val.parse().unwrap_or_default();
                }
                "jpeg_quality" => {
                    s.jpeg_quality = val.parse::<u8>().map(|q| q.clamp(1, 100)).unwrap_or(90);
                }
                "api_key" => {
                    s.api_key = val.to_string();
                }
                "generator_program" => {
                    s.generator_program = val.to_string();
                }
                "log_level" => {
                    s.log_level = val.parse().unwrap_or(log::LevelFilter::Info);
                }
                _ => {}
            }
        }
        s
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "default_grid={}\n\
             max_undo_steps={}\n\
             export_format={}\n\
             jpeg_quality={}\n\
             api_key={}\n\
             generator_program={}\n\
             log_level={}\n",
            self.default_grid,
            self.max_undo_steps,
            self.export_format,
            self.jpeg_quality,
            self.api_key,
            self.generator_program,
            self.log_level.as_str().to_ascii_lowercase(),
        )
    }
}

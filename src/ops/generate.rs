// ============================================================================
// GENERATE — prompt assembly and the external image-generation call
// ============================================================================
//
// The editor never talks to a provider directly. It hands an
// `ImageGenerator` the effective prompt plus the cell's current appearance
// and gets encoded image bytes back.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::cell_history::CellVersion;
use crate::compositor;
use crate::error::{DecodeError, EditorError, GenerationError};
use crate::grid::CellKey;
use crate::image_handle::{self, ImageHandle};
use crate::project::{ProjectState, PromptAssist};

/// Environment variable carrying the effective prompt to a provider program.
pub const PROMPT_ENV: &str = "GRIDFE_PROMPT";
/// Environment variable carrying the API key to a provider program.
pub const API_KEY_ENV: &str = "GRIDFE_API_KEY";

/// Raw prompt followed by every enabled assist, joined with `"; "`.
pub fn compose_prompt(raw: &str, assists: &[PromptAssist]) -> String {
    let enabled: Vec<&str> = assists
        .iter()
        .filter(|a| a.enabled)
        .map(|a| a.text.as_str())
        .collect();
    if enabled.is_empty() {
        raw.to_string()
    } else {
        format!("{}; {}", raw, enabled.join("; "))
    }
}

/// One call to the provider.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    /// Effective prompt (assists already appended).
    pub prompt: String,
    /// The cell as it currently renders, PNG-encoded at its allocated size.
    pub reference_png: Vec<u8>,
    pub api_key: String,
}

/// Image-bytes-in, image-bytes-out generation backend.
pub trait ImageGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<Vec<u8>, GenerationError>;
}

impl<F> ImageGenerator for F
where
    F: Fn(&GenerationRequest) -> Result<Vec<u8>, GenerationError>,
{
    fn generate(&self, request: &GenerationRequest) -> Result<Vec<u8>, GenerationError> {
        self(request)
    }
}

/// Generator used when no provider is configured; every call is rejected.
pub struct NoGenerator;

impl ImageGenerator for NoGenerator {
    fn generate(&self, _request: &GenerationRequest) -> Result<Vec<u8>, GenerationError> {
        Err(GenerationError::Rejected(
            "no generation provider configured".to_string(),
        ))
    }
}

/// Runs an external provider program per request.
///
/// The prompt and key are passed in [`PROMPT_ENV`] / [`API_KEY_ENV`], the
/// reference PNG on stdin. The program writes the generated image to stdout
/// and exits 0; any other exit status is a rejection with stderr as reason.
#[derive(Clone, Debug)]
pub struct ProcessGenerator {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ProcessGenerator {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }
}

impl ImageGenerator for ProcessGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<Vec<u8>, GenerationError> {
        log::debug!("Starting provider {}", self.program.display());
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(PROMPT_ENV, &request.prompt)
            .env(API_KEY_ENV, &request.api_key)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Feed stdin from a separate thread so a provider that writes before
        // reading everything cannot deadlock against us.
        let writer = child.stdin.take().map(|mut stdin| {
            let png = request.reference_png.clone();
            std::thread::spawn(move || stdin.write_all(&png))
        });

        let output = child.wait_with_output()?;
        if let Some(handle) = writer {
            match handle.join() {
                Ok(Ok(())) => {}
                // A provider may ignore the reference and close stdin early.
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    return Err(GenerationError::Rejected(
                        "stdin writer thread panicked".to_string(),
                    ));
                }
            }
        }

        if !output.status.success() {
            let reason = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let reason = if reason.is_empty() {
                format!("provider exited with {}", output.status)
            } else {
                reason
            };
            return Err(GenerationError::Rejected(reason));
        }
        Ok(output.stdout)
    }
}

/// Run one generation for `key` and build the version to append.
///
/// Nothing is mutated here: the caller records history and appends the
/// returned version only when this succeeds.
pub fn generate_cell_version(
    state: &ProjectState,
    base: &ImageHandle,
    key: CellKey,
    raw_prompt: &str,
    api_key: &str,
    generator: &dyn ImageGenerator,
) -> Result<CellVersion, EditorError> {
    if api_key.trim().is_empty() {
        return Err(GenerationError::MissingCredentials.into());
    }
    let reference = compositor::render_cell(state, base, key)?
        .ok_or_else(|| EditorError::CellOutOfRange(key.to_string()))?;
    let request = GenerationRequest {
        prompt: compose_prompt(raw_prompt, &state.metadata.prompt_assists),
        reference_png: image_handle::encode_png(&reference).map_err(DecodeError::Encode)?,
        api_key: api_key.to_string(),
    };

    log::info!("Generating cell {} ({}x{} reference)", key, reference.width(), reference.height());
    let bytes = generator.generate(&request)?;
    if bytes.is_empty() {
        return Err(GenerationError::NoImage.into());
    }
    let handle = ImageHandle::decode_bytes(&bytes).map_err(GenerationError::from)?;
    let image_ref = image_handle::bytes_to_data_uri(&bytes);
    Ok(CellVersion::from_decoded(
        image_ref,
        &handle,
        Some(raw_prompt.to_string()),
    ))
}

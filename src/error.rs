use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// A single failed call to the synthesis adapter.
///
/// Non-zero exit, a missing output file, a timeout and an unresolvable voice all
/// collapse into this one shape. `stderr` is kept for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisFailure {
    pub voice_id: String,
    pub text: String,
    pub reason: String,
    pub stderr: Option<String>,
}

impl SynthesisFailure {
    pub fn new(voice_id: impl Into<String>, text: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            voice_id: voice_id.into(),
            text: text.into(),
            reason: reason.into(),
            stderr: None,
        }
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        let stderr = stderr.into();
        let trimmed = stderr.trim();
        if !trimmed.is_empty() {
            self.stderr = Some(trimmed.to_string());
        }
        self
    }
}

impl fmt::Display for SynthesisFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "synthesis with voice '{}' failed: {} (text: {:?})",
            self.voice_id,
            self.reason,
            preview(&self.text)
        )?;
        if let Some(stderr) = &self.stderr {
            write!(f, "; stderr: {stderr}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SynthesisFailure {}

fn preview(text: &str) -> String {
    const MAX_PREVIEW_CHARS: usize = 60;
    if text.chars().count() <= MAX_PREVIEW_CHARS {
        return text.to_string();
    }
    let mut out: String = text.chars().take(MAX_PREVIEW_CHARS).collect();
    out.push('…');
    out
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("input text is empty; enter some text first")]
    EmptyText,

    #[error("voice unavailable: {0}")]
    VoiceUnavailable(String),

    #[error(transparent)]
    Synthesis(#[from] SynthesisFailure),

    #[error("every voice failed ({} attempted)", .0.len())]
    AllVoicesFailed(Vec<SynthesisFailure>),

    #[error("no audio segments to assemble")]
    NothingToAssemble,

    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("silence gap must be between 0 and {} seconds (got {0})", crate::audio::MAX_GAP_SECONDS)]
    InvalidGap(f32),

    #[error("invalid voice catalog: {0}")]
    Catalog(String),

    #[error("wav codec error: {0}")]
    Wav(#[from] hound::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

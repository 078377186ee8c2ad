//! Multi-voice text-to-speech on top of the Piper command-line synthesizer.
//!
//! Text is split into sentences, each sentence is spoken by a voice picked from
//! the installed catalog, and the resulting PCM segments are joined into one
//! waveform.

pub mod audio;
pub mod batch;
pub mod config;
pub mod error;
pub mod fetch;
pub mod synth;
pub mod text;
pub mod voice;

pub use audio::{WaveformSegment, assemble, read_wav, resample_linear, wav_bytes, write_wav};
pub use batch::{
    AssignedSegment, BatchDispatcher, IndexSource, MixedBatch, Progress, RotationPolicy,
    SimpleRng, VoiceBatch, assign_voices,
};
pub use error::{PipelineError, Result, SynthesisFailure};
pub use synth::{PiperSynthesizer, Synthesizer};
pub use text::segment;
pub use voice::{AssetProbe, CatalogEntry, FsProbe, Gender, Quality, Voice, VoiceCatalog, VoiceRegistry};

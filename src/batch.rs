//! Batch dispatch: one voice, every voice, or a voice per sentence.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::audio::{WaveformSegment, assemble};
use crate::error::{PipelineError, Result, SynthesisFailure};
use crate::synth::Synthesizer;
use crate::text::segment;
use crate::voice::{Voice, VoiceRegistry};

/// A sentence together with the voice that spoke it and the audio produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedSegment {
    pub sentence: String,
    pub voice: Voice,
    pub segment: WaveformSegment,
}

/// Units finished so far out of the batch total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            return 1.0;
        }
        self.completed as f32 / self.total as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPolicy {
    /// Sentence `i` gets `ordered_voices()[i % N]`.
    Sequential,
    /// Each sentence draws a voice uniformly, repeats allowed.
    Random,
}

/// Source of voice indices for random rotation.
pub trait IndexSource {
    /// A value in `0..upper_exclusive`; `upper_exclusive` is at least 1.
    fn next_index(&mut self, upper_exclusive: usize) -> usize;
}

#[derive(Debug, Clone, Copy)]
pub struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    pub fn from_seed(seed: u64) -> Self {
        // Avoid a zero-only cycle in xorshift.
        let state = if seed == 0 {
            0x9E37_79B9_7F4A_7C15
        } else {
            seed
        };
        Self { state }
    }

    pub fn from_entropy() -> Self {
        Self::from_seed(runtime_entropy_seed())
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }
}

impl IndexSource for SimpleRng {
    fn next_index(&mut self, upper_exclusive: usize) -> usize {
        if upper_exclusive <= 1 {
            return 0;
        }
        (self.next_u64() % upper_exclusive as u64) as usize
    }
}

fn runtime_entropy_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_nanos();
    let pid = u64::from(std::process::id());
    (nanos as u64) ^ (nanos >> 64) as u64 ^ pid.rotate_left(13)
}

/// Pick a voice for each of `count` sentences.
pub fn assign_voices<'a>(
    voices: &'a [Voice],
    count: usize,
    policy: RotationPolicy,
    rng: &mut dyn IndexSource,
) -> Vec<&'a Voice> {
    if voices.is_empty() {
        return Vec::new();
    }
    (0..count)
        .map(|i| match policy {
            RotationPolicy::Sequential => &voices[i % voices.len()],
            RotationPolicy::Random => {
                let index = rng.next_index(voices.len()).min(voices.len() - 1);
                &voices[index]
            }
        })
        .collect()
}

/// Outcome of running the same text through every installed voice.
#[derive(Debug, Clone)]
pub struct VoiceBatch {
    /// Successes in catalog order.
    pub succeeded: Vec<AssignedSegment>,
    pub failed: Vec<SynthesisFailure>,
}

impl VoiceBatch {
    /// Successful results keyed by voice display name.
    pub fn by_voice(&self) -> BTreeMap<&str, &AssignedSegment> {
        self.succeeded
            .iter()
            .map(|item| (item.voice.display_name.as_str(), item))
            .collect()
    }

    pub fn failed_voice_ids(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.voice_id.as_str()).collect()
    }
}

/// Outcome of per-sentence voice rotation.
#[derive(Debug, Clone)]
pub struct MixedBatch {
    pub sentence_count: usize,
    /// Successes in sentence order. Failed sentences are absent.
    pub segments: Vec<AssignedSegment>,
    /// Failed sentences with their index in the segmented input.
    pub failed: Vec<(usize, SynthesisFailure)>,
}

impl MixedBatch {
    pub fn is_complete(&self) -> bool {
        self.segments.len() == self.sentence_count
    }

    /// Join the successful sentences into one waveform.
    pub fn assemble(&self, silence_between_seconds: f32) -> Result<WaveformSegment> {
        let waveforms: Vec<WaveformSegment> =
            self.segments.iter().map(|s| s.segment.clone()).collect();
        assemble(&waveforms, silence_between_seconds)
    }
}

/// Drives a `Synthesizer` over the installed voices, one call at a time.
pub struct BatchDispatcher<'a> {
    synthesizer: &'a dyn Synthesizer,
    registry: &'a VoiceRegistry,
}

impl<'a> BatchDispatcher<'a> {
    pub fn new(synthesizer: &'a dyn Synthesizer, registry: &'a VoiceRegistry) -> Self {
        Self {
            synthesizer,
            registry,
        }
    }

    pub fn synthesize_one(
        &self,
        sentence: &str,
        voice: &Voice,
    ) -> std::result::Result<AssignedSegment, SynthesisFailure> {
        let segment = self.synthesizer.synthesize(sentence, voice)?;
        Ok(AssignedSegment {
            sentence: sentence.to_string(),
            voice: voice.clone(),
            segment,
        })
    }

    /// The whole text, unsegmented, with the voice named `display_name`.
    pub fn single(&self, text: &str, display_name: &str) -> Result<AssignedSegment> {
        let text = non_empty(text)?;
        let voice = self.registry.lookup(display_name)?;
        Ok(self.synthesize_one(text, voice)?)
    }

    /// The whole text once per installed voice. Fails only if every voice fails.
    pub fn all_voices(&self, text: &str, mut on_progress: impl FnMut(Progress)) -> Result<VoiceBatch> {
        let text = non_empty(text)?;
        self.registry.require_non_empty()?;

        let voices = self.registry.ordered_voices();
        let total = voices.len();
        let mut batch = VoiceBatch {
            succeeded: Vec::with_capacity(total),
            failed: Vec::new(),
        };

        for (completed, voice) in voices.iter().enumerate() {
            match self.synthesize_one(text, voice) {
                Ok(item) => batch.succeeded.push(item),
                Err(failure) => {
                    warn!("{failure}");
                    batch.failed.push(failure);
                }
            }
            on_progress(Progress {
                completed: completed + 1,
                total,
            });
        }

        if batch.succeeded.is_empty() {
            return Err(PipelineError::AllVoicesFailed(batch.failed));
        }
        info!(
            succeeded = batch.succeeded.len(),
            failed = batch.failed.len(),
            "all-voices batch finished"
        );
        Ok(batch)
    }

    /// Segment the text and speak each sentence with a rotated voice.
    ///
    /// Failed sentences are left out of `segments` and listed in `failed`.
    pub fn mixed(
        &self,
        text: &str,
        policy: RotationPolicy,
        rng: &mut dyn IndexSource,
        mut on_progress: impl FnMut(Progress),
    ) -> Result<MixedBatch> {
        let text = non_empty(text)?;
        self.registry.require_non_empty()?;

        let sentences = segment(text);
        let assignments = assign_voices(self.registry.ordered_voices(), sentences.len(), policy, rng);
        let total = sentences.len();
        let mut batch = MixedBatch {
            sentence_count: total,
            segments: Vec::with_capacity(total),
            failed: Vec::new(),
        };

        for (index, (sentence, voice)) in sentences.into_iter().zip(assignments).enumerate() {
            match self.synthesize_one(sentence, voice) {
                Ok(item) => batch.segments.push(item),
                Err(failure) => {
                    warn!(sentence = index, "{failure}");
                    batch.failed.push((index, failure));
                }
            }
            on_progress(Progress {
                completed: index + 1,
                total,
            });
        }

        info!(
            sentences = total,
            synthesized = batch.segments.len(),
            ?policy,
            "mixed-voice batch finished"
        );
        Ok(batch)
    }
}

fn non_empty(text: &str) -> Result<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::EmptyText);
    }
    Ok(trimmed)
}

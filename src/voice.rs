//! Voice catalog and the registry of voices whose assets are present.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    Medium,
    High,
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Male => "male",
            Self::Female => "female",
        })
    }
}

/// One declared voice, before its assets have been located.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub quality: Quality,
    pub gender: Gender,
}

impl CatalogEntry {
    fn new(id: &str, display_name: &str, quality: Quality, gender: Gender) -> Self {
        Self {
            id: id.to_string(),
            display_name: Some(display_name.to_string()),
            quality,
            gender,
        }
    }

    pub fn display_name(&self) -> String {
        match &self.display_name {
            Some(name) => name.clone(),
            None => display_name_from_id(&self.id),
        }
    }

    pub fn model_path(&self, models_dir: &Path) -> PathBuf {
        models_dir.join(format!("{}.onnx", self.id))
    }

    pub fn config_path(&self, models_dir: &Path) -> PathBuf {
        models_dir.join(format!("{}.onnx.json", self.id))
    }
}

/// `en_US-lessac-medium` becomes `en US lessac medium`.
pub fn display_name_from_id(id: &str) -> String {
    id.replace(['-', '_'], " ")
}

/// Quality named by the last part of a Piper voice id, if any.
fn quality_from_id(id: &str) -> Option<Quality> {
    match id.rsplit('-').next()? {
        "x_low" | "low" => Some(Quality::Low),
        "medium" => Some(Quality::Medium),
        "high" => Some(Quality::High),
        _ => None,
    }
}

/// Ordered list of known voices. Declaration order drives sequential rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceCatalog {
    entries: Vec<CatalogEntry>,
}

impl VoiceCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Result<Self> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for entry in &entries {
            if entry.id.trim().is_empty() {
                return Err(PipelineError::Catalog("voice id must not be empty".into()));
            }
            if entry.id.contains(['/', '\\']) {
                return Err(PipelineError::Catalog(format!(
                    "voice id '{}' must be a bare file stem",
                    entry.id
                )));
            }
            if !ids.insert(entry.id.clone()) {
                return Err(PipelineError::Catalog(format!("duplicate voice id '{}'", entry.id)));
            }
            let name = entry.display_name();
            if !names.insert(name.clone()) {
                return Err(PipelineError::Catalog(format!("duplicate display name '{name}'")));
            }
        }
        Ok(Self { entries })
    }

    /// The nine Piper voices the app ships with.
    pub fn builtin() -> Self {
        use Gender::{Female, Male};
        use Quality::{High, Low, Medium};

        Self {
            entries: vec![
                CatalogEntry::new("en_US-amy-medium", "Amy (US)", Medium, Female),
                CatalogEntry::new("en_US-lessac-high", "Lessac HQ (US)", High, Female),
                CatalogEntry::new("en_US-lessac-medium", "Lessac (US)", Medium, Female),
                CatalogEntry::new("en_US-kathleen-low", "Kathleen (US)", Low, Female),
                CatalogEntry::new("en_US-hfc_female-medium", "HFC Female (US)", Medium, Female),
                CatalogEntry::new("en_US-ryan-high", "Ryan HQ (US)", High, Male),
                CatalogEntry::new("en_US-joe-medium", "Joe (US)", Medium, Male),
                CatalogEntry::new("en_US-danny-low", "Danny (US)", Low, Male),
                CatalogEntry::new("en_US-hfc_male-medium", "HFC Male (US)", Medium, Male),
            ],
        }
    }

    /// Load a JSON array of catalog entries.
    pub fn from_json(json: &str) -> Result<Self> {
        let entries: Vec<CatalogEntry> = serde_json::from_str(json)
            .map_err(|err| PipelineError::Catalog(format!("failed parsing catalog json: {err}")))?;
        Self::new(entries)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A voice whose model and sidecar config were both found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    pub id: String,
    pub display_name: String,
    pub model_path: PathBuf,
    pub config_path: PathBuf,
    pub quality: Option<Quality>,
    pub gender: Option<Gender>,
}

/// Answers whether a voice's assets exist and which files a models directory holds.
pub trait AssetProbe {
    fn exists(&self, path: &Path) -> bool;
    fn list(&self, dir: &Path) -> Vec<PathBuf>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl AssetProbe for FsProbe {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn list(&self, dir: &Path) -> Vec<PathBuf> {
        match fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok().map(|entry| entry.path()))
                .filter(|path| path.is_file())
                .collect(),
            Err(err) => {
                debug!(dir = %dir.display(), "cannot list models dir: {err}");
                Vec::new()
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VoiceRegistry {
    voices: Vec<Voice>,
}

impl VoiceRegistry {
    /// Keep the catalog entries whose `.onnx` model and `.onnx.json` sidecar are
    /// both present under `models_dir`, in catalog order. Other model pairs found
    /// in the directory follow, sorted by id and named after it.
    pub fn discover(catalog: &VoiceCatalog, models_dir: &Path, probe: &dyn AssetProbe) -> Self {
        let mut voices = Vec::with_capacity(catalog.len());
        for entry in catalog.entries() {
            let model_path = entry.model_path(models_dir);
            let config_path = entry.config_path(models_dir);
            if !probe.exists(&model_path) {
                debug!(voice = %entry.id, path = %model_path.display(), "voice model missing");
                continue;
            }
            if !probe.exists(&config_path) {
                debug!(voice = %entry.id, path = %config_path.display(), "voice config missing");
                continue;
            }
            voices.push(Voice {
                id: entry.id.clone(),
                display_name: entry.display_name(),
                model_path,
                config_path,
                quality: Some(entry.quality),
                gender: Some(entry.gender),
            });
        }

        let catalogued: HashSet<&str> = catalog.entries().iter().map(|e| e.id.as_str()).collect();
        let mut extra_ids: Vec<String> = probe
            .list(models_dir)
            .iter()
            .filter_map(|path| path.file_name()?.to_str()?.strip_suffix(".onnx"))
            .filter(|id| !id.is_empty() && !catalogued.contains(id))
            .map(str::to_string)
            .collect();
        extra_ids.sort();
        for id in extra_ids {
            let config_path = models_dir.join(format!("{id}.onnx.json"));
            if !probe.exists(&config_path) {
                debug!(voice = %id, path = %config_path.display(), "voice config missing");
                continue;
            }
            let display_name = display_name_from_id(&id);
            if voices.iter().any(|voice| voice.display_name == display_name) {
                warn!(voice = %id, name = %display_name, "display name already taken; skipping model");
                continue;
            }
            voices.push(Voice {
                model_path: models_dir.join(format!("{id}.onnx")),
                config_path,
                quality: quality_from_id(&id),
                gender: None,
                display_name,
                id,
            });
        }

        if voices.is_empty() {
            warn!(models_dir = %models_dir.display(), "no voice has its assets installed");
        }
        Self { voices }
    }

    /// Build a registry from already located voices. Display names must be unique.
    pub fn from_voices(voices: Vec<Voice>) -> Result<Self> {
        let mut names = HashSet::new();
        for voice in &voices {
            if !names.insert(voice.display_name.as_str()) {
                return Err(PipelineError::Catalog(format!(
                    "duplicate display name '{}'",
                    voice.display_name
                )));
            }
        }
        Ok(Self { voices })
    }

    /// Voices in catalog declaration order, then uncatalogued models by id.
    pub fn ordered_voices(&self) -> &[Voice] {
        &self.voices
    }

    /// Voices keyed by display name.
    pub fn available_voices(&self) -> BTreeMap<&str, &Voice> {
        self.voices
            .iter()
            .map(|voice| (voice.display_name.as_str(), voice))
            .collect()
    }

    /// Exact display-name lookup.
    pub fn lookup(&self, display_name: &str) -> Result<&Voice> {
        if self.voices.is_empty() {
            return Err(PipelineError::VoiceUnavailable(
                "no voices are installed".to_string(),
            ));
        }
        self.voices
            .iter()
            .find(|voice| voice.display_name == display_name)
            .ok_or_else(|| {
                PipelineError::VoiceUnavailable(format!("no voice named '{display_name}'"))
            })
    }

    /// Fails with `VoiceUnavailable` when nothing is installed.
    pub fn require_non_empty(&self) -> Result<()> {
        if self.voices.is_empty() {
            return Err(PipelineError::VoiceUnavailable(
                "no voices are installed".to_string(),
            ));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }
}

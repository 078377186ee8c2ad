//! Runtime settings: where Piper and its voices live.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use directories::ProjectDirs;

use crate::synth::{DEFAULT_TIMEOUT, PiperSynthesizer};
use crate::voice::{FsProbe, VoiceCatalog, VoiceRegistry};

pub const PIPER_DIR_ENV: &str = "PIPER_DIR";
pub const PIPER_BIN_ENV: &str = "PIPER_BIN";
pub const PIPER_MODELS_DIR_ENV: &str = "PIPER_MODELS_DIR";

#[cfg(windows)]
const PIPER_EXECUTABLE: &str = "piper.exe";
#[cfg(not(windows))]
const PIPER_EXECUTABLE: &str = "piper";

/// Values supplied on the command line; unset fields fall back to the
/// environment and then to defaults.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub piper_dir: Option<PathBuf>,
    pub executable: Option<PathBuf>,
    pub executable_args: Vec<String>,
    pub models_dir: Option<PathBuf>,
    pub catalog: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub piper_dir: PathBuf,
    pub executable: PathBuf,
    pub executable_args: Vec<String>,
    pub models_dir: PathBuf,
    pub catalog: Option<PathBuf>,
    pub timeout: Duration,
}

impl Settings {
    pub fn resolve(overrides: Overrides) -> Result<Self> {
        Self::resolve_with(overrides, |key| std::env::var_os(key).map(PathBuf::from))
    }

    fn resolve_with(overrides: Overrides, env: impl Fn(&str) -> Option<PathBuf>) -> Result<Self> {
        let piper_dir = match overrides.piper_dir.or_else(|| env(PIPER_DIR_ENV)) {
            Some(dir) => dir,
            None => default_piper_dir()?,
        };
        let executable = overrides
            .executable
            .or_else(|| env(PIPER_BIN_ENV))
            .unwrap_or_else(|| piper_dir.join(PIPER_EXECUTABLE));
        let models_dir = overrides
            .models_dir
            .or_else(|| env(PIPER_MODELS_DIR_ENV))
            .unwrap_or_else(|| piper_dir.join("models"));

        let timeout = match overrides.timeout_secs {
            Some(0) => bail!("timeout must be at least one second"),
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_TIMEOUT,
        };

        Ok(Self {
            piper_dir,
            executable,
            executable_args: overrides.executable_args,
            models_dir,
            catalog: overrides.catalog,
            timeout,
        })
    }

    pub fn load_catalog(&self) -> Result<VoiceCatalog> {
        match &self.catalog {
            Some(path) => VoiceCatalog::load(path)
                .with_context(|| format!("failed loading voice catalog {}", path.display())),
            None => Ok(VoiceCatalog::builtin()),
        }
    }

    pub fn registry(&self, catalog: &VoiceCatalog) -> VoiceRegistry {
        VoiceRegistry::discover(catalog, &self.models_dir, &FsProbe)
    }

    pub fn synthesizer(&self) -> PiperSynthesizer {
        let working_dir = self.piper_dir.is_dir().then(|| self.piper_dir.clone());
        PiperSynthesizer::new(&self.executable)
            .with_leading_args(self.executable_args.clone())
            .with_working_dir(working_dir)
            .with_timeout(self.timeout)
    }

    /// Bare executable names are looked up on `PATH` by the OS.
    pub fn check_executable(&self) -> Result<()> {
        if is_bare_name(&self.executable) || self.executable.is_file() {
            return Ok(());
        }
        bail!(
            "piper executable not found at {} (set --piper-bin or {PIPER_BIN_ENV})",
            self.executable.display()
        )
    }
}

fn is_bare_name(path: &Path) -> bool {
    path.components().count() == 1 && path.parent().is_some_and(|p| p.as_os_str().is_empty())
}

fn default_piper_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("io", "piper-tts", "piper-tts")
        .ok_or_else(|| anyhow!("could not determine platform data directory"))?;
    Ok(dirs.data_dir().join("piper"))
}

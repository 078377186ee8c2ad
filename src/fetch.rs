//! Download Piper voice assets from Hugging Face.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use tracing::info;

const VOICES_REPO: &str = "rhasspy/piper-voices";
const VOICES_REVISION: &str = "v1.0.0";

/// A voice id split into the parts of its repository path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceKey<'a> {
    pub language: &'a str,
    pub family: &'a str,
    pub name: &'a str,
    pub quality: &'a str,
}

/// Parse `<lang>_<REGION>-<name>-<quality>`, e.g. `en_US-lessac-medium`.
pub fn parse_voice_id(id: &str) -> Result<VoiceKey<'_>> {
    let parts: Vec<&str> = id.split('-').collect();
    let &[language, name, quality] = parts.as_slice() else {
        bail!("voice id '{id}' is not of the form <lang>_<REGION>-<name>-<quality>");
    };
    let Some((family, _region)) = language.split_once('_') else {
        bail!("voice id '{id}' has no language region (expected e.g. en_US)");
    };
    if name.is_empty() || !matches!(quality, "x_low" | "low" | "medium" | "high") {
        bail!("voice id '{id}' has an unknown name or quality");
    }
    Ok(VoiceKey {
        language,
        family,
        name,
        quality,
    })
}

pub fn asset_url(key: &VoiceKey<'_>, file_name: &str) -> String {
    format!(
        "https://huggingface.co/{VOICES_REPO}/resolve/{VOICES_REVISION}/{}/{}/{}/{}/{file_name}?download=true",
        key.family, key.language, key.name, key.quality
    )
}

pub fn build_http_client() -> Result<Client> {
    Client::builder()
        .user_agent(concat!("piper-tts-rs/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(300))
        .build()
        .context("failed building HTTP client")
}

/// Fetch the model and its JSON sidecar into `models_dir`. Existing files are
/// kept unless `force` is set. Returns the two local paths.
pub fn fetch_voice(
    client: &Client,
    models_dir: &Path,
    voice_id: &str,
    force: bool,
) -> Result<(PathBuf, PathBuf)> {
    let key = parse_voice_id(voice_id)?;
    fs::create_dir_all(models_dir)
        .with_context(|| format!("failed creating models dir {}", models_dir.display()))?;

    let model_name = format!("{voice_id}.onnx");
    let config_name = format!("{voice_id}.onnx.json");
    let model_path = models_dir.join(&model_name);
    let config_path = models_dir.join(&config_name);

    // Sidecar first: it is small and proves the id exists upstream.
    for (file_name, dest) in [(&config_name, &config_path), (&model_name, &model_path)] {
        if !force && dest.exists() {
            info!(path = %dest.display(), "already present");
            continue;
        }
        download_file(client, &asset_url(&key, file_name), dest)
            .with_context(|| format!("failed downloading {file_name}"))?;
        info!(path = %dest.display(), "downloaded");
    }

    Ok((model_path, config_path))
}

fn download_file(client: &Client, url: &str, dest: &Path) -> Result<()> {
    let temp_path = dest.with_extension("download.tmp");
    let result = (|| -> Result<()> {
        let mut response = client
            .get(url)
            .send()
            .with_context(|| format!("http request failed for {url}"))?
            .error_for_status()
            .with_context(|| format!("download failed for {url}"))?;

        let mut file = File::create(&temp_path)
            .with_context(|| format!("failed creating temp file {}", temp_path.display()))?;
        io::copy(&mut response, &mut file)
            .with_context(|| format!("failed writing to temp file {}", temp_path.display()))?;
        file.flush()?;

        fs::rename(&temp_path, dest).with_context(|| {
            format!(
                "failed moving temp file {} to {}",
                temp_path.display(),
                dest.display()
            )
        })?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_voice_ids() {
        let key = parse_voice_id("en_US-hfc_female-medium").expect("valid id");
        assert_eq!(
            key,
            VoiceKey {
                language: "en_US",
                family: "en",
                name: "hfc_female",
                quality: "medium",
            }
        );
    }

    #[test]
    fn rejects_malformed_voice_ids() {
        assert!(parse_voice_id("lessac-medium").is_err());
        assert!(parse_voice_id("en-lessac-medium").is_err());
        assert!(parse_voice_id("en_US-lessac-ultra").is_err());
        assert!(parse_voice_id("en_US-lessac-medium-extra").is_err());
    }

    #[test]
    fn asset_url_follows_repository_layout() {
        let key = parse_voice_id("en_GB-alan-low").expect("valid id");
        assert_eq!(
            asset_url(&key, "en_GB-alan-low.onnx.json"),
            "https://huggingface.co/rhasspy/piper-voices/resolve/v1.0.0/en/en_GB/alan/low/en_GB-alan-low.onnx.json?download=true"
        );
    }

    #[test]
    fn existing_assets_are_not_downloaded_again() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("en_US-amy-medium.onnx"), b"m").expect("write");
        fs::write(dir.path().join("en_US-amy-medium.onnx.json"), b"{}").expect("write");

        let client = build_http_client().expect("client");
        let (model, config) =
            fetch_voice(&client, dir.path(), "en_US-amy-medium", false).expect("no network needed");
        assert_eq!(fs::read(model).expect("read"), b"m");
        assert_eq!(fs::read(config).expect("read"), b"{}");
    }
}

//! The synthesis adapter: one Piper process per call.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::audio::{WaveformSegment, read_wav};
use crate::error::SynthesisFailure;
use crate::voice::Voice;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// How long to wait for the pipe threads once the adapter process is gone.
const PIPE_GRACE: Duration = Duration::from_millis(500);

/// Turns text into audio with one voice.
pub trait Synthesizer {
    fn synthesize(&self, text: &str, voice: &Voice) -> Result<WaveformSegment, SynthesisFailure>;
}

/// Runs the Piper executable with the voice's model and sidecar config, feeds
/// the text on stdin and decodes the wave file it writes.
#[derive(Debug, Clone)]
pub struct PiperSynthesizer {
    executable: PathBuf,
    leading_args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl PiperSynthesizer {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            leading_args: Vec::new(),
            working_dir: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Arguments placed before the Piper flags, e.g. `-m piper` for a python launcher.
    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn run(&self, text: &str, voice: &Voice, output: &Path) -> Result<(), SynthesisFailure> {
        let fail = |reason: String| SynthesisFailure::new(&voice.id, text, reason);

        let mut command = Command::new(&self.executable);
        command
            .args(&self.leading_args)
            .arg("--model")
            .arg(&voice.model_path)
            .arg("--output_file")
            .arg(output)
            .arg("--json_config")
            .arg(&voice.config_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|err| {
            fail(format!(
                "failed to launch '{}': {err}",
                self.executable.display()
            ))
        })?;

        // Both pipes are serviced off-thread so a child that stops reading or
        // floods stderr cannot stall the timeout below. A descendant of the
        // adapter may still hold either pipe after the adapter is gone, so the
        // threads are only waited on for a short grace period.
        let stdin_writer = child.stdin.take().map(|mut stdin| {
            let payload = text.as_bytes().to_vec();
            pipe_task(move || stdin.write_all(&payload))
        });
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            pipe_task(move || {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf);
                buf
            })
        });

        let status = wait_with_timeout(&mut child, self.timeout)
            .map_err(|err| fail(format!("failed waiting for adapter process: {err}")))?;

        if let Some(rx) = stdin_writer
            && let Ok(Err(err)) = rx.recv_timeout(PIPE_GRACE)
            && status.is_some_and(|s| s.success())
        {
            warn!(voice = %voice.id, "adapter exited before reading all input: {err}");
        }
        let stderr = stderr_reader
            .and_then(|rx| rx.recv_timeout(PIPE_GRACE).ok())
            .unwrap_or_default();

        let Some(status) = status else {
            return Err(fail(format!(
                "timed out after {:.1}s",
                self.timeout.as_secs_f64()
            ))
            .with_stderr(stderr));
        };
        if !status.success() {
            return Err(fail(format!("adapter exited with {status}")).with_stderr(stderr));
        }
        if !output.is_file() {
            return Err(fail("adapter produced no output file".to_string()).with_stderr(stderr));
        }
        if !stderr.trim().is_empty() {
            debug!(voice = %voice.id, stderr = %stderr.trim(), "adapter diagnostics");
        }
        Ok(())
    }
}

impl Synthesizer for PiperSynthesizer {
    fn synthesize(&self, text: &str, voice: &Voice) -> Result<WaveformSegment, SynthesisFailure> {
        for asset in [&voice.model_path, &voice.config_path] {
            if !asset.is_file() {
                return Err(SynthesisFailure::new(
                    &voice.id,
                    text,
                    format!("voice asset not found: {}", asset.display()),
                ));
            }
        }

        let scratch = tempfile::Builder::new()
            .prefix("piper-tts-")
            .tempdir()
            .map_err(|err| {
                SynthesisFailure::new(&voice.id, text, format!("failed creating scratch dir: {err}"))
            })?;
        let output = scratch.path().join(artifact_name(&voice.id));

        let started = Instant::now();
        debug!(voice = %voice.id, chars = text.chars().count(), "starting synthesis");
        self.run(text, voice, &output)?;

        let segment = read_wav(&output).map_err(|err| {
            SynthesisFailure::new(&voice.id, text, format!("failed decoding adapter output: {err}"))
        })?;
        info!(
            voice = %voice.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            audio_secs = segment.duration_secs(),
            "synthesized"
        );
        Ok(segment)
    }
}

/// Output file name unique per voice and call time.
fn artifact_name(voice_id: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let sanitized: String = voice_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{sanitized}-{nanos}.wav")
}

/// Run `task` on its own thread; the result arrives on the returned channel.
fn pipe_task<T: Send + 'static>(task: impl FnOnce() -> T + Send + 'static) -> Receiver<T> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(task());
    });
    rx
}

/// Wait for `child`, killing it once `timeout` elapses. `None` means it was killed.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            if let Err(err) = child.kill() {
                warn!("failed killing timed-out adapter process: {err}");
            }
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::audio::write_wav;
    use crate::voice::{Gender, Quality};
    use std::fs;

    struct Fixture {
        dir: tempfile::TempDir,
        voice: Voice,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let model_path = dir.path().join("en_US-test-medium.onnx");
        let config_path = dir.path().join("en_US-test-medium.onnx.json");
        fs::write(&model_path, b"model").expect("write model");
        fs::write(&config_path, b"{}").expect("write config");
        write_wav(
            &dir.path().join("fixture.wav"),
            &WaveformSegment::mono(vec![10, 20, 30], 22_050),
        )
        .expect("write fixture wav");

        Fixture {
            voice: Voice {
                id: "en_US-test-medium".to_string(),
                display_name: "Test".to_string(),
                model_path,
                config_path,
                quality: Some(Quality::Medium),
                gender: Some(Gender::Female),
            },
            dir,
        }
    }

    fn shell(script: String) -> PiperSynthesizer {
        PiperSynthesizer::new("/bin/sh").with_leading_args(vec![
            "-c".to_string(),
            script,
            "piper".to_string(),
        ])
    }

    const FIND_OUTPUT: &str =
        r#"while [ "$#" -gt 0 ]; do if [ "$1" = "--output_file" ]; then out="$2"; fi; shift; done"#;

    #[test]
    fn successful_run_decodes_output_and_receives_text() {
        let fx = fixture();
        let dir = fx.dir.path().display();
        let script = format!(
            "{FIND_OUTPUT}; cat > '{dir}/stdin.txt'; cp '{dir}/fixture.wav' \"$out\""
        );

        let segment = shell(script)
            .synthesize("Hello there.", &fx.voice)
            .expect("synthesis should succeed");
        assert_eq!(segment, WaveformSegment::mono(vec![10, 20, 30], 22_050));
        let received = fs::read_to_string(fx.dir.path().join("stdin.txt")).expect("stdin capture");
        assert_eq!(received, "Hello there.");
    }

    #[test]
    fn non_zero_exit_is_a_failure_with_stderr() {
        let fx = fixture();
        let failure = shell("cat > /dev/null; echo boom >&2; exit 3".to_string())
            .synthesize("Hi.", &fx.voice)
            .expect_err("exit 3 should fail");
        assert_eq!(failure.voice_id, "en_US-test-medium");
        assert!(failure.reason.contains("exited"));
        assert_eq!(failure.stderr.as_deref(), Some("boom"));
    }

    #[test]
    fn missing_artifact_is_a_failure() {
        let fx = fixture();
        let failure = shell("cat > /dev/null; exit 0".to_string())
            .synthesize("Hi.", &fx.voice)
            .expect_err("no output should fail");
        assert!(failure.reason.contains("no output file"));
    }

    #[test]
    fn slow_adapter_is_killed_after_timeout() {
        let fx = fixture();
        let started = Instant::now();
        let failure = shell("exec sleep 5".to_string())
            .with_timeout(Duration::from_millis(200))
            .synthesize("Hi.", &fx.voice)
            .expect_err("timeout should fail");
        assert!(failure.reason.contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn timeout_holds_when_a_forked_child_keeps_stderr_open() {
        let fx = fixture();
        let started = Instant::now();
        let failure = shell("cat > /dev/null; sleep 4; true".to_string())
            .with_timeout(Duration::from_millis(200))
            .synthesize("Hi.", &fx.voice)
            .expect_err("timeout should fail");
        assert!(failure.reason.contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn missing_voice_asset_fails_without_spawning() {
        let fx = fixture();
        let mut voice = fx.voice.clone();
        voice.model_path = fx.dir.path().join("absent.onnx");
        let failure = PiperSynthesizer::new("/definitely/not/piper")
            .synthesize("Hi.", &voice)
            .expect_err("missing asset should fail");
        assert!(failure.reason.contains("voice asset not found"));
    }

    #[test]
    fn unlaunchable_executable_is_a_failure() {
        let fx = fixture();
        let failure = PiperSynthesizer::new("/definitely/not/piper")
            .synthesize("Hi.", &fx.voice)
            .expect_err("launch should fail");
        assert!(failure.reason.contains("failed to launch"));
    }

    #[test]
    fn artifact_names_are_sanitized() {
        let name = artifact_name("en_US/../x y");
        assert!(name.starts_with("en_US____x_y-"));
        assert!(name.ends_with(".wav"));
    }
}

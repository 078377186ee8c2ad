use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use piper_tts::config::{Overrides, Settings};
use piper_tts::fetch::{build_http_client, fetch_voice};
use piper_tts::{
    BatchDispatcher, MixedBatch, PiperSynthesizer, Progress, RotationPolicy, SimpleRng,
    VoiceCatalog, VoiceRegistry, WaveformSegment, write_wav,
};

#[derive(Debug, Parser)]
#[command(name = "piper-tts")]
#[command(about = "Multi-voice text-to-speech on top of the Piper CLI")]
struct Cli {
    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List catalog voices and whether their assets are installed
    Voices(VoicesArgs),
    /// Speak the whole text with one voice
    Synthesize(SynthesizeArgs),
    /// Speak the whole text once with every installed voice
    AllVoices(AllVoicesArgs),
    /// Speak each sentence with a rotating voice and join the result
    Mix(MixArgs),
    /// Synthesize and play through ffplay or pw-play
    Play(PlayArgs),
    /// Download voice assets into the models directory
    Fetch(FetchArgs),
}

#[derive(Debug, Clone, Args)]
struct PiperSelection {
    #[arg(long, help = "Piper install directory (default: $PIPER_DIR or platform data dir)")]
    piper_dir: Option<PathBuf>,
    #[arg(long, help = "Piper executable (default: $PIPER_BIN or <piper-dir>/piper)")]
    piper_bin: Option<PathBuf>,
    #[arg(
        long = "piper-arg",
        allow_hyphen_values = true,
        help = "Argument placed before the Piper flags; repeatable (e.g. -m piper)"
    )]
    piper_args: Vec<String>,
    #[arg(long, help = "Voice models directory (default: $PIPER_MODELS_DIR or <piper-dir>/models)")]
    models_dir: Option<PathBuf>,
    #[arg(long, help = "JSON voice catalog replacing the built-in one")]
    catalog: Option<PathBuf>,
    #[arg(long, help = "Seconds to wait for each Piper call")]
    timeout_secs: Option<u64>,
}

impl PiperSelection {
    fn settings(&self) -> Result<Settings> {
        Settings::resolve(Overrides {
            piper_dir: self.piper_dir.clone(),
            executable: self.piper_bin.clone(),
            executable_args: self.piper_args.clone(),
            models_dir: self.models_dir.clone(),
            catalog: self.catalog.clone(),
            timeout_secs: self.timeout_secs,
        })
    }
}

#[derive(Debug, Clone, Args)]
struct TextInput {
    #[arg(long, conflicts_with = "text_file")]
    text: Option<String>,
    #[arg(long, conflicts_with = "text")]
    text_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct VoicesArgs {
    #[command(flatten)]
    piper: PiperSelection,
}

#[derive(Debug, Args)]
struct SynthesizeArgs {
    #[command(flatten)]
    piper: PiperSelection,
    #[command(flatten)]
    text: TextInput,
    #[arg(long, help = "Voice display name, as listed by `voices`")]
    voice: String,
    #[arg(long, help = "Output wav (default: piper_tts_<voice>.wav)")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct AllVoicesArgs {
    #[command(flatten)]
    piper: PiperSelection,
    #[command(flatten)]
    text: TextInput,
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct MixOptions {
    #[arg(long, value_enum, default_value_t = PolicyArg::Sequential)]
    policy: PolicyArg,
    #[arg(long, help = "Random seed for reproducible random rotation")]
    seed: Option<u64>,
    #[arg(long, default_value_t = 0.0, help = "Seconds of silence between sentences")]
    gap: f32,
}

#[derive(Debug, Args)]
struct MixArgs {
    #[command(flatten)]
    piper: PiperSelection,
    #[command(flatten)]
    text: TextInput,
    #[command(flatten)]
    mix: MixOptions,
    #[arg(long, default_value = "piper_tts_mixed.wav")]
    output: PathBuf,
}

#[derive(Debug, Args)]
struct PlayArgs {
    #[command(flatten)]
    piper: PiperSelection,
    #[command(flatten)]
    text: TextInput,
    #[arg(long, help = "Voice display name. If omitted, rotate voices per sentence")]
    voice: Option<String>,
    #[command(flatten)]
    mix: MixOptions,
    #[arg(long, value_enum, default_value_t = PlayerMode::Auto)]
    player: PlayerMode,
}

#[derive(Debug, Args)]
struct FetchArgs {
    #[command(flatten)]
    piper: PiperSelection,
    #[arg(long, required = true, help = "Voice id such as en_US-lessac-medium; repeatable")]
    voice: Vec<String>,
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    Sequential,
    Random,
}

impl From<PolicyArg> for RotationPolicy {
    fn from(value: PolicyArg) -> Self {
        match value {
            PolicyArg::Sequential => RotationPolicy::Sequential,
            PolicyArg::Random => RotationPolicy::Random,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PlayerMode {
    Auto,
    Ffplay,
    PwPlay,
}

/// Catalog, installed voices and a ready adapter for one command.
struct Runtime {
    catalog: VoiceCatalog,
    registry: VoiceRegistry,
    synthesizer: PiperSynthesizer,
}

impl Runtime {
    fn prepare(selection: &PiperSelection) -> Result<Self> {
        let settings = selection.settings()?;
        let catalog = settings.load_catalog()?;
        let registry = settings.registry(&catalog);
        settings.check_executable()?;
        Ok(Self {
            catalog,
            registry,
            synthesizer: settings.synthesizer(),
        })
    }

    fn require_voices(&self) -> Result<()> {
        if self.registry.is_empty() {
            bail!(
                "no voices installed; download one with `piper-tts fetch --voice <id>` (catalog ids: {})",
                self.catalog
                    .entries()
                    .iter()
                    .map(|e| e.id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        Ok(())
    }

    fn dispatcher(&self) -> BatchDispatcher<'_> {
        BatchDispatcher::new(&self.synthesizer, &self.registry)
    }
}

fn read_text_input(text_input: &TextInput) -> Result<String> {
    if let Some(text) = &text_input.text {
        return Ok(text.clone());
    }

    if let Some(path) = &text_input.text_file {
        return fs::read_to_string(path)
            .with_context(|| format!("failed reading text file {}", path.display()));
    }

    if io::stdin().is_terminal() {
        bail!("provide input text via --text, --text-file, or pipe stdin");
    }

    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}

/// `Amy (US)` becomes `piper_tts_Amy_US.wav`.
fn download_file_name(display_name: &str) -> String {
    let stem: String = display_name
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' => Some(c),
            _ => None,
        })
        .collect();
    format!("piper_tts_{stem}.wav")
}

fn progress_bar() -> Result<ProgressBar> {
    let bar = ProgressBar::new(0);
    bar.set_style(ProgressStyle::with_template(
        "{spinner} [{bar:30}] {pos}/{len} {msg}",
    )?);
    Ok(bar)
}

fn track(bar: &ProgressBar, progress: Progress) {
    bar.set_length(progress.total as u64);
    bar.set_position(progress.completed as u64);
}

fn run_mix(runtime: &Runtime, text: &str, options: &MixOptions) -> Result<(MixedBatch, WaveformSegment)> {
    let mut rng = match options.seed {
        Some(seed) => SimpleRng::from_seed(seed),
        None => SimpleRng::from_entropy(),
    };
    let bar = progress_bar()?;
    let batch = runtime
        .dispatcher()
        .mixed(text, options.policy.into(), &mut rng, |p| track(&bar, p))?;
    bar.finish_and_clear();

    for item in &batch.segments {
        println!("[{}] {}", item.voice.display_name, item.sentence);
    }
    for (index, failure) in &batch.failed {
        eprintln!("sentence {} skipped: {failure}", index + 1);
    }
    if batch.segments.is_empty() {
        bail!("every sentence failed to synthesize");
    }

    let audio = batch.assemble(options.gap)?;
    Ok((batch, audio))
}

/// An audio player and the arguments placed before the wav path.
struct Player {
    mode: PlayerMode,
    program: &'static str,
    args: &'static [&'static str],
}

/// Known players in auto-detection order.
const PLAYERS: &[Player] = &[
    Player {
        mode: PlayerMode::Ffplay,
        program: "ffplay",
        args: &["-autoexit", "-nodisp", "-loglevel", "error"],
    },
    Player {
        mode: PlayerMode::PwPlay,
        program: "pw-play",
        args: &[],
    },
];

fn executable_in_path(program: &str) -> bool {
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    let suffixes = executable_suffixes();
    std::env::split_paths(&path_var).any(|dir| {
        suffixes
            .iter()
            .any(|suffix| dir.join(format!("{program}{suffix}")).is_file())
    })
}

#[cfg(windows)]
fn executable_suffixes() -> Vec<String> {
    let pathext = std::env::var_os("PATHEXT")
        .map(|v| v.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_else(|| ".exe;.bat;.cmd".to_string());
    std::iter::once(String::new())
        .chain(
            pathext
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        )
        .collect()
}

#[cfg(not(windows))]
fn executable_suffixes() -> Vec<String> {
    vec![String::new()]
}

fn detect_player(mode: PlayerMode) -> Result<&'static Player> {
    let wanted: Vec<&'static Player> = PLAYERS
        .iter()
        .filter(|player| mode == PlayerMode::Auto || player.mode == mode)
        .collect();
    if let Some(player) = wanted
        .iter()
        .copied()
        .find(|player| executable_in_path(player.program))
    {
        return Ok(player);
    }
    let names = wanted
        .iter()
        .map(|player| format!("'{}'", player.program))
        .collect::<Vec<_>>()
        .join(" or ");
    bail!("no audio player found on PATH (looked for {names}); use `synthesize` and play the wav manually")
}

fn play_audio(audio: &WaveformSegment, player_mode: PlayerMode) -> Result<()> {
    let player = detect_player(player_mode)?;

    let temp_file = tempfile::Builder::new()
        .prefix("piper-tts-play-")
        .suffix(".wav")
        .tempfile()
        .context("failed creating temporary wav file for playback")?;
    write_wav(temp_file.path(), audio)?;

    let status = Command::new(player.program)
        .args(player.args)
        .arg(temp_file.path())
        .status()
        .with_context(|| format!("failed to launch {}", player.program))?;
    if !status.success() {
        bail!("{} exited with {status}", player.program);
    }
    Ok(())
}

fn write_output(path: &Path, audio: &WaveformSegment) -> Result<()> {
    write_wav(path, audio).with_context(|| format!("failed writing wav file {}", path.display()))?;
    eprintln!(
        "wrote {:.2}s ({} samples @ {} Hz) to {}",
        audio.duration_secs(),
        audio.samples.len(),
        audio.sample_rate,
        path.display()
    );
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose {
        "piper_tts=debug"
    } else {
        "piper_tts=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Voices(args) => {
            let settings = args.piper.settings()?;
            let catalog = settings.load_catalog()?;
            let registry = settings.registry(&catalog);
            let available = registry.available_voices();

            println!("Models dir: {}", settings.models_dir.display());
            println!(
                "Voices ({} installed, {} in catalog):",
                registry.len(),
                catalog.len()
            );
            for entry in catalog.entries() {
                let name = entry.display_name();
                let marker = if available.contains_key(name.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{marker} {name:<20} {:<28} {:<7} {}",
                    entry.id, entry.quality, entry.gender
                );
            }
            let uncatalogued = registry
                .ordered_voices()
                .iter()
                .filter(|voice| !catalog.entries().iter().any(|entry| entry.id == voice.id));
            for voice in uncatalogued {
                let quality = voice.quality.map_or_else(|| "?".to_string(), |q| q.to_string());
                println!(
                    "* {:<20} {:<28} {quality:<7} ?",
                    voice.display_name, voice.id
                );
            }
        }
        Commands::Synthesize(args) => {
            let text = read_text_input(&args.text)?;
            let runtime = Runtime::prepare(&args.piper)?;
            runtime.require_voices()?;

            let item = runtime.dispatcher().single(&text, &args.voice)?;
            let output = args
                .output
                .unwrap_or_else(|| PathBuf::from(download_file_name(&item.voice.display_name)));
            write_output(&output, &item.segment)?;
        }
        Commands::AllVoices(args) => {
            let text = read_text_input(&args.text)?;
            let runtime = Runtime::prepare(&args.piper)?;
            runtime.require_voices()?;
            fs::create_dir_all(&args.output_dir).with_context(|| {
                format!("failed creating output dir {}", args.output_dir.display())
            })?;

            let bar = progress_bar()?;
            let batch = runtime
                .dispatcher()
                .all_voices(&text, |p| track(&bar, p))?;
            bar.finish_and_clear();

            for (name, item) in batch.by_voice() {
                let path = args.output_dir.join(download_file_name(name));
                write_output(&path, &item.segment)?;
            }
            for failure in &batch.failed {
                eprintln!("failed: {failure}");
            }
        }
        Commands::Mix(args) => {
            let text = read_text_input(&args.text)?;
            let runtime = Runtime::prepare(&args.piper)?;
            runtime.require_voices()?;

            let (batch, audio) = run_mix(&runtime, &text, &args.mix)?;
            if !batch.is_complete() {
                warn!(
                    "{} of {} sentences were skipped",
                    batch.sentence_count - batch.segments.len(),
                    batch.sentence_count
                );
            }
            write_output(&args.output, &audio)?;
        }
        Commands::Play(args) => {
            let text = read_text_input(&args.text)?;
            let runtime = Runtime::prepare(&args.piper)?;
            runtime.require_voices()?;

            let audio = match &args.voice {
                Some(voice) => runtime.dispatcher().single(&text, voice)?.segment,
                None => run_mix(&runtime, &text, &args.mix)?.1,
            };
            play_audio(&audio, args.player)?;
        }
        Commands::Fetch(args) => {
            let settings = args.piper.settings()?;
            let client = build_http_client()?;
            for voice in &args.voice {
                let (model, config) = fetch_voice(&client, &settings.models_dir, voice, args.force)?;
                println!("Voice: {voice}");
                println!("Model: {}", model.display());
                println!("Config: {}", config.display());
            }
        }
    }

    Ok(())
}

use crate::config::{Paths, UserConfig};
use crate::embed::{self, Embed, EmbedderHandle, LoadOptions, ModelChoice};
use crate::{logging, output};
use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use clap::error::ErrorKind;
use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::PathBuf;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;

#[derive(Parser, Debug)]
#[command(name = "embedder", version)]
#[command(about = "Embed a text with a pretrained sentence model and print the vector as JSON")]
pub struct Args {
    /// Text to embed; unknown hyphen-leading words are taken as text.
    /// Put `--` first to embed text that looks like a flag (`-- --help`)
    #[arg(value_name = "TEXT", allow_hyphen_values = true)]
    pub text: Option<String>,

    /// Anything after the text is ignored
    #[arg(hide = true)]
    pub rest: Vec<String>,

    /// Embedding model: minilm (default), bge, nomic, gemma, potion [env: EMBEDDER_MODEL]
    #[arg(short, long, value_name = "NAME")]
    pub model: Option<String>,

    /// Read the text from stdin instead of TEXT
    #[arg(long, conflicts_with = "text")]
    pub stdin: bool,

    /// Data root holding config.toml and the model cache (default: ~/.embedder) [env: EMBEDDER_HOME]
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,
}

/// Environment fallbacks for flags. Set-but-blank variables count as unset.
#[derive(Debug, Clone, Default)]
pub struct EnvDefaults {
    pub model: Option<String>,
    pub home: Option<PathBuf>,
}

impl EnvDefaults {
    pub fn from_process() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            model: get("EMBEDDER_MODEL"),
            home: get("EMBEDDER_HOME").map(PathBuf::from),
        }
    }
}

pub fn run() -> u8 {
    // A broken log file must not change the output contract.
    let _ = logging::init();

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let stderr = std::io::stderr();
    execute(
        std::env::args_os(),
        &EnvDefaults::from_process(),
        EmbedderHandle::load,
        &mut stdin.lock(),
        &mut stdout.lock(),
        &mut stderr.lock(),
    )
}

/// Parses `argv`, embeds the text with the model `load` returns and writes the
/// result. Every failure ends as `[]` plus an `Error:` line on `stderr`.
pub fn execute<I, T, L, E>(
    argv: I,
    env: &EnvDefaults,
    load: L,
    stdin: &mut impl Read,
    stdout: &mut impl Write,
    stderr: &mut impl Write,
) -> u8
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
    L: FnOnce(&LoadOptions) -> Result<E>,
    E: Embed,
{
    let args = match Args::try_parse_from(argv) {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = write!(stdout, "{e}");
            return EXIT_SUCCESS;
        }
        Err(e) => {
            output::write_failure(stderr, &usage_error(&e));
            return EXIT_FAILURE;
        }
    };

    let result = embed_input(&args, env, load, stdin)
        .and_then(|vector| output::write_embedding(stdout, &vector));
    match result {
        Ok(()) => EXIT_SUCCESS,
        Err(error) => {
            tracing::debug!(error = %format!("{error:#}"), "embedding failed");
            output::write_failure(stderr, &error);
            EXIT_FAILURE
        }
    }
}

fn embed_input<L, E>(
    args: &Args,
    env: &EnvDefaults,
    load: L,
    stdin: &mut impl Read,
) -> Result<Vec<f32>>
where
    L: FnOnce(&LoadOptions) -> Result<E>,
    E: Embed,
{
    let text = read_text(args, stdin)?;
    if !args.rest.is_empty() {
        tracing::debug!(ignored = args.rest.len(), "extra arguments ignored");
    }

    let paths = Paths::new(args.root.clone().or_else(|| env.home.clone()))?;
    let config = UserConfig::load(&paths)?;
    let choice = resolve_model(args.model.as_deref(), env, &config)?;
    let opts = LoadOptions {
        choice,
        cache_dir: config.ensure_cache_dir(&paths)?,
        show_download_progress: config.show_download_progress(),
    };

    let mut embedder = load(&opts)?;
    let vector = embedder.embed_one(&text)?;
    embed::validate(&vector, embedder.dims())?;
    Ok(vector)
}

fn read_text(args: &Args, stdin: &mut impl Read) -> Result<String> {
    let text = if args.stdin {
        let mut buf = String::new();
        stdin.read_to_string(&mut buf).context("reading stdin")?;
        buf.trim_end_matches(['\n', '\r']).to_string()
    } else {
        args.text.clone().unwrap_or_default()
    };
    if text.is_empty() {
        bail!("no input text provided");
    }
    Ok(text)
}

/// Flag, then EMBEDDER_MODEL, then config.toml, then the default model.
fn resolve_model(
    flag: Option<&str>,
    env: &EnvDefaults,
    config: &UserConfig,
) -> Result<ModelChoice> {
    let name = flag
        .or(env.model.as_deref())
        .or(config.model())
        .filter(|s| !s.trim().is_empty());
    match name {
        Some(name) => ModelChoice::parse(name),
        None => Ok(ModelChoice::default()),
    }
}

fn usage_error(e: &clap::Error) -> anyhow::Error {
    let rendered = e.to_string();
    let first = rendered
        .lines()
        .next()
        .unwrap_or("invalid arguments")
        .trim_start_matches("error: ");
    anyhow!("{first}")
}

use anyhow::{Context, Result, anyhow};
use directories::BaseDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Paths {
    pub root: PathBuf,
    pub models: PathBuf,
    pub config: PathBuf,
}

impl Paths {
    pub fn new(root_override: Option<PathBuf>) -> Result<Self> {
        let root = match root_override {
            Some(path) => path,
            None => {
                let base = BaseDirs::new().ok_or_else(|| anyhow!("missing home dir"))?;
                base.home_dir().join(".embedder")
            }
        };

        Ok(Self {
            models: root.join("models"),
            config: root.join("config.toml"),
            root,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserConfig {
    /// Embedding model: minilm (default), bge, nomic, gemma, potion
    pub model: Option<String>,
    /// Where downloaded model files are kept. Default: <root>/models.
    pub cache_dir: Option<PathBuf>,
    /// Show the model library's download progress bars on stderr.
    pub show_download_progress: Option<bool>,
}

impl UserConfig {
    pub fn load(paths: &Paths) -> Result<Self> {
        if !paths.config.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&paths.config)
            .with_context(|| format!("reading {}", paths.config.display()))?;
        let config: UserConfig = toml::from_str(&contents)
            .with_context(|| format!("parsing {}", paths.config.display()))?;
        Ok(config)
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn cache_dir<'a>(&'a self, paths: &'a Paths) -> &'a Path {
        self.cache_dir.as_deref().unwrap_or(&paths.models)
    }

    pub fn show_download_progress(&self) -> bool {
        self.show_download_progress.unwrap_or(false)
    }

    /// Creates the model cache directory so the model library can write into it.
    pub fn ensure_cache_dir(&self, paths: &Paths) -> Result<PathBuf> {
        let dir = self.cache_dir(paths).to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating model cache {}", dir.display()))?;
        Ok(dir)
    }
}

use anyhow::{Result, anyhow, bail};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use model2vec_rs::model::StaticModel;
use std::path::PathBuf;
use std::time::Instant;

/// Supported embedding models
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModelChoice {
    /// AllMiniLML6V2 - 22M params, 384 dims, very fast
    #[default]
    MiniLM,
    /// BGESmallENV15 - 33M params, 384 dims, good balance
    BGESmall,
    /// NomicEmbedTextV15 - 137M params, 768 dims, good quality
    Nomic,
    /// EmbeddingGemma300M - 300M params, 768 dims, highest quality but slowest
    Gemma,
    /// PotionBase8M - 8M params, model2vec backend, tiny and fast
    Potion,
}

const POTION_REPO: &str = "minishlab/potion-base-8M";

impl ModelChoice {
    fn fastembed_config(self) -> Option<(EmbeddingModel, usize)> {
        match self {
            ModelChoice::MiniLM => Some((EmbeddingModel::AllMiniLML6V2, 384)),
            ModelChoice::BGESmall => Some((EmbeddingModel::BGESmallENV15, 384)),
            ModelChoice::Nomic => Some((EmbeddingModel::NomicEmbedTextV15, 768)),
            ModelChoice::Gemma => Some((EmbeddingModel::EmbeddingGemma300M, 768)),
            ModelChoice::Potion => None,
        }
    }

    /// Parse from string (flag, env var or config)
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "minilm" | "mini" | "all-minilm-l6-v2" | "fast" | "default" => Ok(ModelChoice::MiniLM),
            "bge" | "bge-small" | "bgesmall" => Ok(ModelChoice::BGESmall),
            "nomic" => Ok(ModelChoice::Nomic),
            "gemma" | "embeddinggemma" => Ok(ModelChoice::Gemma),
            "potion" | "potion8m" | "potion-8m" | "potion-base-8m" | "model2vec" => {
                Ok(ModelChoice::Potion)
            }
            _ => Err(anyhow!(
                "unknown model '{s}', options: minilm, bge, nomic, gemma, potion"
            )),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ModelChoice::MiniLM => "all-MiniLM-L6-v2",
            ModelChoice::BGESmall => "bge-small-en-v1.5",
            ModelChoice::Nomic => "nomic-embed-text-v1.5",
            ModelChoice::Gemma => "embeddinggemma-300m",
            ModelChoice::Potion => "potion-base-8M",
        }
    }
}

/// What the CLI needs to load a model.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub choice: ModelChoice,
    pub cache_dir: PathBuf,
    pub show_download_progress: bool,
}

impl LoadOptions {
    pub fn new(choice: ModelChoice, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            choice,
            cache_dir: cache_dir.into(),
            show_download_progress: false,
        }
    }
}

/// A loaded model that turns one text into one vector.
pub trait Embed {
    fn dims(&self) -> usize;
    fn embed_one(&mut self, text: &str) -> Result<Vec<f32>>;
}

enum EmbedBackend {
    Fastembed(TextEmbedding),
    Model2Vec(StaticModel),
}

pub struct EmbedderHandle {
    backend: EmbedBackend,
    pub choice: ModelChoice,
    pub dims: usize,
}

impl EmbedderHandle {
    pub fn load(opts: &LoadOptions) -> Result<Self> {
        let start = Instant::now();
        let handle = Self::load_backend(opts)?;
        tracing::info!(
            model = handle.choice.name(),
            dims = handle.dims,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "model loaded"
        );
        Ok(handle)
    }

    fn load_backend(opts: &LoadOptions) -> Result<Self> {
        let choice = opts.choice;
        if let Some((model_type, dims)) = choice.fastembed_config() {
            set_runtime_threads();

            #[cfg(target_os = "macos")]
            let init = {
                use ort::execution_providers::coreml::{
                    CoreMLComputeUnits, CoreMLExecutionProvider,
                };
                let compute_units = std::env::var("EMBEDDER_COMPUTE_UNITS")
                    .ok()
                    .map(|v| match v.to_lowercase().as_str() {
                        "ane" | "neural" | "neuralengine" => CoreMLComputeUnits::CPUAndNeuralEngine,
                        "gpu" => CoreMLComputeUnits::CPUAndGPU,
                        "cpu" => CoreMLComputeUnits::CPUOnly,
                        _ => CoreMLComputeUnits::All,
                    })
                    .unwrap_or(CoreMLComputeUnits::All);
                let provider = CoreMLExecutionProvider::default()
                    .with_subgraphs(true)
                    .with_compute_units(compute_units);
                InitOptions::new(model_type)
                    .with_cache_dir(opts.cache_dir.clone())
                    .with_show_download_progress(opts.show_download_progress)
                    .with_execution_providers(vec![provider.build()])
            };

            #[cfg(not(target_os = "macos"))]
            let init = InitOptions::new(model_type)
                .with_cache_dir(opts.cache_dir.clone())
                .with_show_download_progress(opts.show_download_progress);

            tracing::debug!(model = choice.name(), cache_dir = %opts.cache_dir.display(), "loading fastembed model");
            let model = TextEmbedding::try_new(init)
                .map_err(|e| anyhow!("failed to load model {}: {e}", choice.name()))?;
            Ok(Self {
                backend: EmbedBackend::Fastembed(model),
                choice,
                dims,
            })
        } else {
            tracing::debug!(model = choice.name(), repo = POTION_REPO, "loading model2vec model");
            let model = StaticModel::from_pretrained(POTION_REPO, None, None, None)
                .map_err(|e| anyhow!("failed to load model {}: {e}", choice.name()))?;
            let dims = model
                .encode(&[String::from("dimension_check")])
                .first()
                .map(|vec| vec.len())
                .ok_or_else(|| anyhow!("no embedding returned"))?;
            Ok(Self {
                backend: EmbedBackend::Model2Vec(model),
                choice,
                dims,
            })
        }
    }

    pub fn embed_texts(&mut self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        match &mut self.backend {
            EmbedBackend::Fastembed(model) => Ok(model.embed(texts, None)?),
            EmbedBackend::Model2Vec(model) => {
                let input: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
                Ok(model.encode_with_args(&input, Some(512), 64))
            }
        }
    }
}

impl Embed for EmbedderHandle {
    fn dims(&self) -> usize {
        self.dims
    }

    fn embed_one(&mut self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            bail!("no input text provided");
        }
        let start = Instant::now();
        let mut vectors = self.embed_texts(&[text])?;
        if vectors.len() != 1 {
            bail!("expected 1 embedding, model returned {}", vectors.len());
        }
        let vector = vectors.swap_remove(0);
        tracing::debug!(
            chars = text.chars().count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "embedded text"
        );
        Ok(vector)
    }
}

/// Checks a vector against the model's dimensionality and rejects NaN or infinite values.
pub fn validate(vector: &[f32], dims: usize) -> Result<()> {
    if vector.len() != dims {
        bail!(
            "embedding has {} dimensions, expected {dims}",
            vector.len()
        );
    }
    if let Some(pos) = vector.iter().position(|v| !v.is_finite()) {
        bail!("embedding contains a non-finite value at index {pos}");
    }
    Ok(())
}

// ONNX Runtime reads these at session creation; leave them alone if the caller set them.
fn set_runtime_threads() {
    let num_cpus = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(8)
        .to_string();
    for key in ["OMP_NUM_THREADS", "ORT_NUM_THREADS"] {
        if std::env::var_os(key).is_none() {
            // Single-threaded at this point: nothing else reads the environment concurrently.
            unsafe {
                std::env::set_var(key, &num_cpus);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn fastembed_test_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load(choice: ModelChoice) -> EmbedderHandle {
        let cache = std::env::temp_dir().join("embedder-test-models");
        EmbedderHandle::load(&LoadOptions::new(choice, cache)).expect("failed to init embedder")
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(ModelChoice::parse("MiniLM").unwrap(), ModelChoice::MiniLM);
        assert_eq!(
            ModelChoice::parse("all-MiniLM-L6-v2").unwrap(),
            ModelChoice::MiniLM
        );
        assert_eq!(ModelChoice::parse("bge-small").unwrap(), ModelChoice::BGESmall);
        assert_eq!(ModelChoice::parse(" nomic ").unwrap(), ModelChoice::Nomic);
        assert_eq!(ModelChoice::parse("embeddinggemma").unwrap(), ModelChoice::Gemma);
        assert_eq!(ModelChoice::parse("model2vec").unwrap(), ModelChoice::Potion);
        assert_eq!(ModelChoice::default(), ModelChoice::MiniLM);
    }

    #[test]
    fn test_parse_unknown_model() {
        let err = ModelChoice::parse("word2vec").expect_err("unknown model");
        let msg = err.to_string();
        assert!(msg.contains("word2vec"));
        assert!(msg.contains("minilm"));
    }

    #[test]
    fn test_default_model_is_384_dims() {
        let (model, dims) = ModelChoice::MiniLM.fastembed_config().expect("fastembed model");
        assert!(matches!(model, EmbeddingModel::AllMiniLML6V2));
        assert_eq!(dims, 384);
        assert!(ModelChoice::Potion.fastembed_config().is_none());
    }

    #[test]
    fn test_validate() {
        assert!(validate(&[0.1, -0.2, 0.3], 3).is_ok());

        let err = validate(&[0.1, 0.2], 3).expect_err("wrong length");
        assert!(err.to_string().contains("expected 3"));

        let err = validate(&[0.1, f32::NAN, 0.3], 3).expect_err("nan");
        assert!(err.to_string().contains("index 1"));

        assert!(validate(&[f32::INFINITY], 1).is_err());
    }

    #[test]
    #[ignore = "downloads all-MiniLM-L6-v2"]
    fn test_embed_single_text() {
        let _guard = fastembed_test_lock();
        let mut embedder = load(ModelChoice::MiniLM);
        let vector = embedder.embed_one("Hello world").expect("failed to embed");
        assert_eq!(vector.len(), 384);
        assert_eq!(vector.len(), embedder.dims());
        validate(&vector, embedder.dims()).expect("finite vector");
    }

    #[test]
    #[ignore = "downloads all-MiniLM-L6-v2"]
    fn test_embed_one_rejects_empty() {
        let _guard = fastembed_test_lock();
        let mut embedder = load(ModelChoice::MiniLM);
        assert!(embedder.embed_one("").is_err());
        assert!(embedder.embed_texts(&[]).expect("empty batch").is_empty());
    }

    #[test]
    #[ignore = "downloads all-MiniLM-L6-v2"]
    fn test_same_text_same_embedding() {
        let _guard = fastembed_test_lock();
        let mut embedder = load(ModelChoice::MiniLM);
        let first = embedder.embed_one("the cat sat on the mat").expect("embed");
        let second = embedder.embed_one("the cat sat on the mat").expect("embed");
        for (a, b) in first.iter().zip(second.iter()) {
            assert!((a - b).abs() < 1e-5, "{a} vs {b}");
        }
    }

    #[test]
    #[ignore = "downloads all-MiniLM-L6-v2"]
    fn test_similar_texts_have_similar_embeddings() {
        let _guard = fastembed_test_lock();
        let mut embedder = load(ModelChoice::MiniLM);
        let texts = vec!["the cat sat on the mat", "a cat is sitting on a mat"];
        let embeddings = embedder.embed_texts(&texts).expect("failed to embed");

        let dot: f32 = embeddings[0]
            .iter()
            .zip(embeddings[1].iter())
            .map(|(a, b)| a * b)
            .sum();
        let norm0: f32 = embeddings[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm1: f32 = embeddings[1].iter().map(|x| x * x).sum::<f32>().sqrt();
        let cosine_sim = dot / (norm0 * norm1);

        assert!(
            cosine_sim > 0.8,
            "expected high similarity, got {cosine_sim}"
        );
    }

    #[test]
    #[ignore = "downloads potion-base-8M"]
    fn test_potion_embedding() {
        let _guard = fastembed_test_lock();
        let mut embedder = load(ModelChoice::Potion);
        let vector = embedder.embed_one("potion model smoke test").expect("embed with potion");
        assert_eq!(vector.len(), embedder.dims);
        assert!(embedder.dims > 0);
    }
}

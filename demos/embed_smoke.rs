use anyhow::Result;
use embedder::embed::{Embed, EmbedderHandle, LoadOptions, ModelChoice, validate};

fn main() -> Result<()> {
    let choice = std::env::var("EMBEDDER_MODEL")
        .ok()
        .map(|s| ModelChoice::parse(&s))
        .transpose()?
        .unwrap_or_default();
    let cache_dir = std::env::temp_dir().join("embedder-smoke-models");
    let mut embedder = EmbedderHandle::load(&LoadOptions::new(choice, cache_dir))?;

    let first = embedder.embed_one("hello world")?;
    let again = embedder.embed_one("hello world")?;
    validate(&first, embedder.dims())?;

    let drift = first
        .iter()
        .zip(again.iter())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0f32, f32::max);
    println!("{}: dims {}, max drift {drift:e}", choice.name(), embedder.dims());
    let preview: Vec<String> = first.iter().take(8).map(|v| format!("{v:.4}")).collect();
    println!("first: [{}]", preview.join(", "));
    Ok(())
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding provider interface and implementations.
//!
//! Providers map text to dense `f32` vectors. [`Embedder`] wraps the
//! configured provider as a process-wide service: the model is built once on
//! first use, and a failed initialization is remembered so every later call
//! fails the same way instead of silently retrying.

use anyhow::{bail, Context, Result};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::borrow::Cow;
use std::env;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::config::{EmbeddingConfig, EmbeddingProviderType};
use crate::errors::IndexError;

const DEFAULT_FASTEMBED_MODEL: &str = "minilm";
const DEFAULT_FASTEMBED_BATCH_SIZE: usize = 256;
const MAX_FASTEMBED_BATCH_SIZE: usize = 1024;
const DEFAULT_FASTEMBED_MAX_CHARS: usize = 2000;
const DEFAULT_COMMAND_BATCH_SIZE: usize = 64;

/// Dimension produced by the hash provider unless configured otherwise.
pub const DEFAULT_HASH_DIM: usize = 384;

/// Configuration for the fastembed provider.
#[derive(Debug, Clone)]
pub struct EmbeddingProviderConfig {
    pub model: EmbeddingModel,
    pub batch_size: usize,
    pub max_chars: usize,
    pub normalize: bool,
}

impl EmbeddingProviderConfig {
    /// Builds the provider config from file settings, then applies
    /// `FASTEMBED_*` environment overrides.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let model = parse_model_name(config.model())?;
        let mut settings = Self {
            model,
            batch_size: config.batch_size().unwrap_or(DEFAULT_FASTEMBED_BATCH_SIZE),
            max_chars: DEFAULT_FASTEMBED_MAX_CHARS,
            normalize: config.normalize(),
        };
        settings.apply_env()?;
        Ok(settings)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(raw) = env::var("FASTEMBED_MODEL") {
            if !raw.trim().is_empty() {
                self.model = parse_model_name(&raw)?;
            }
        }

        let mut batch_size = parse_usize_env("FASTEMBED_BATCH_SIZE", self.batch_size)?;
        if batch_size == 0 {
            batch_size = DEFAULT_FASTEMBED_BATCH_SIZE;
        }
        if batch_size > MAX_FASTEMBED_BATCH_SIZE {
            tracing::warn!(
                "FASTEMBED_BATCH_SIZE={} exceeds max {}; clamping.",
                batch_size,
                MAX_FASTEMBED_BATCH_SIZE
            );
            batch_size = MAX_FASTEMBED_BATCH_SIZE;
        }
        self.batch_size = batch_size;

        let max_chars = parse_usize_env("FASTEMBED_MAX_CHARS", self.max_chars)?;
        self.max_chars = if max_chars == 0 {
            DEFAULT_FASTEMBED_MAX_CHARS
        } else {
            max_chars
        };

        self.normalize = parse_bool_env("FASTEMBED_NORMALIZE", self.normalize)?;
        Ok(())
    }
}

impl Default for EmbeddingProviderConfig {
    fn default() -> Self {
        Self {
            model: EmbeddingModel::AllMiniLML6V2,
            batch_size: DEFAULT_FASTEMBED_BATCH_SIZE,
            max_chars: DEFAULT_FASTEMBED_MAX_CHARS,
            normalize: true,
        }
    }
}

/// Trait for embedding providers.
pub trait EmbeddingProvider: Send {
    /// Returns the model identifier.
    fn model_id(&self) -> &str;

    /// Returns the batch size used by the provider.
    fn batch_size(&self) -> usize;

    /// Generates embeddings for the given texts.
    fn embed_texts(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Generates an embedding for a single text.
    fn embed_one(&mut self, text: &str) -> Result<Vec<f32>> {
        let mut result = self.embed_texts(&[text.to_string()])?;
        result
            .pop()
            .ok_or_else(|| anyhow::anyhow!("No embedding returned"))
    }
}

/// FastEmbed provider using sentence-transformers/all-MiniLM-L6-v2.
pub struct FastEmbedder {
    embedder: TextEmbedding,
    config: EmbeddingProviderConfig,
    model_id: String,
}

impl FastEmbedder {
    pub fn new(config: EmbeddingProviderConfig) -> Result<Self> {
        let model = config.model.clone();
        let model_id = model.to_string();
        let init = InitOptions::new(model);
        let embedder =
            TextEmbedding::try_new(init).context("Failed to initialize fastembed model")?;

        Ok(Self {
            embedder,
            config,
            model_id,
        })
    }
}

impl EmbeddingProvider for FastEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    fn embed_texts(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let prepared = truncate_texts(texts, self.config.max_chars);
        let mut embeddings = self
            .embedder
            .embed(&prepared, Some(self.config.batch_size))?;

        if self.config.normalize {
            for embedding in embeddings.iter_mut() {
                l2_normalize(embedding);
            }
        }

        Ok(embeddings)
    }
}

/// Command provider that shells out to an external process.
///
/// The command receives `{"model": ..., "texts": [...]}` on stdin and prints
/// either a JSON array of vectors or an object with an `embeddings`,
/// `vectors` or `data` field.
pub struct CommandProvider {
    command: String,
    model: String,
    batch_size: usize,
}

impl CommandProvider {
    pub fn new(command: String, model: String) -> Self {
        Self {
            command,
            model,
            batch_size: DEFAULT_COMMAND_BATCH_SIZE,
        }
    }

    /// Sets the number of texts sent per invocation.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn run_command(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let payload = serde_json::json!({
            "model": self.model,
            "texts": texts,
        });

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn embedding command: {}", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload_str = payload.to_string();
            stdin
                .write_all(payload_str.as_bytes())
                .context("Failed to write embeddings payload to stdin")?;
        }

        let output = child
            .wait_with_output()
            .context("Failed to read embeddings command output")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Embedding command failed (status {}): {}",
                output.status,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: Value = serde_json::from_str(stdout.trim())
            .with_context(|| "Failed to parse embeddings command output as JSON")?;

        parse_vectors(parsed)
    }
}

impl EmbeddingProvider for CommandProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_texts(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1)) {
            vectors.extend(self.run_command(batch)?);
        }
        Ok(vectors)
    }
}

/// Deterministic feature-hashing provider.
///
/// Each lowercase alphanumeric token is hashed with blake3 into one of
/// `dimension` buckets with a sign bit, then the vector is L2-normalized.
/// Identical texts always produce identical vectors, and texts sharing
/// vocabulary land close together, which is enough for offline use and tests.
pub struct HashEmbedder {
    model: String,
    dimension: usize,
    batch_size: usize,
}

impl HashEmbedder {
    /// Creates a new hash provider with specified dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            model: format!("hash-{}", dimension),
            dimension: dimension.max(1),
            batch_size: DEFAULT_FASTEMBED_BATCH_SIZE,
        }
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let token = token.to_lowercase();
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let bucket = u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]) as usize
                % self.dimension;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn embed_texts(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

type ProviderFactory = Box<dyn Fn() -> Result<Box<dyn EmbeddingProvider>> + Send + Sync>;

/// Lazily initialized, shared embedding service.
///
/// Construct one per process and pass it by reference to the store manager
/// and retriever. The provider is built on the first `encode` call; the
/// vector dimension is fixed by the first successful call.
pub struct Embedder {
    factory: ProviderFactory,
    provider: OnceCell<std::result::Result<Mutex<Box<dyn EmbeddingProvider>>, String>>,
    dimension: OnceCell<usize>,
}

impl Embedder {
    /// Creates an embedder whose provider is built by `factory` on first use.
    pub fn lazy<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn EmbeddingProvider>> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            provider: OnceCell::new(),
            dimension: OnceCell::new(),
        }
    }

    /// Wraps an already constructed provider.
    pub fn from_provider(provider: Box<dyn EmbeddingProvider>) -> Self {
        let embedder = Self::lazy(|| bail!("provider already initialized"));
        let _ = embedder.provider.set(Ok(Mutex::new(provider)));
        embedder
    }

    /// Builds the embedder described by the `[embeddings]` config section.
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let config = config.clone();
        Self::lazy(move || build_provider(&config))
    }

    /// Dimension established by the first successful call, if any.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension.get().copied()
    }

    /// Whether the provider has been built (successfully or not).
    pub fn is_initialized(&self) -> bool {
        self.provider.get().is_some()
    }

    fn provider(&self) -> std::result::Result<&Mutex<Box<dyn EmbeddingProvider>>, IndexError> {
        let slot = self.provider.get_or_init(|| {
            info!("Loading embedding model");
            (self.factory)()
                .map(Mutex::new)
                .map_err(|err| format!("{:#}", err))
        });
        slot.as_ref()
            .map_err(|reason| IndexError::embedding("initialization", reason))
    }

    /// Returns the model identifier, initializing the provider if needed.
    pub fn model_id(&self) -> std::result::Result<String, IndexError> {
        let provider = self.provider()?;
        let guard = provider
            .lock()
            .map_err(|_| IndexError::embedding("model_id", "provider lock poisoned"))?;
        Ok(guard.model_id().to_string())
    }

    /// Encodes `texts` into one vector per text, all of the same dimension.
    pub fn encode(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, IndexError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let provider = self.provider()?;
        let vectors = {
            let mut guard = provider
                .lock()
                .map_err(|_| IndexError::embedding("encode", "provider lock poisoned"))?;
            guard
                .embed_texts(texts)
                .map_err(|err| IndexError::embedding("encode", format!("{:#}", err)))?
        };

        if vectors.len() != texts.len() {
            return Err(IndexError::embedding(
                "encode",
                format!("expected {} vectors, got {}", texts.len(), vectors.len()),
            ));
        }

        let first = vectors.first().map(Vec::len).unwrap_or_default();
        let expected = *self.dimension.get_or_init(|| {
            debug!("Embedding dimension established: {}", first);
            first
        });
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }

        Ok(vectors)
    }

    /// Encodes a single text.
    pub fn encode_one(&self, text: &str) -> std::result::Result<Vec<f32>, IndexError> {
        let mut vectors = self.encode(&[text.to_string()])?;
        vectors
            .pop()
            .ok_or_else(|| IndexError::embedding("encode", "no embedding returned"))
    }
}

/// Builds the provider selected in the `[embeddings]` config section.
pub fn build_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider() {
        EmbeddingProviderType::Builtin => {
            let settings = EmbeddingProviderConfig::from_config(config)?;
            Ok(Box::new(FastEmbedder::new(settings)?))
        }
        EmbeddingProviderType::Command => {
            let command = config
                .command()
                .ok_or_else(|| {
                    anyhow::anyhow!("embeddings.command is required for the command provider")
                })?;
            let mut provider =
                CommandProvider::new(command.to_string(), config.model().to_string());
            if let Some(batch_size) = config.batch_size() {
                provider = provider.with_batch_size(batch_size);
            }
            Ok(Box::new(provider))
        }
        EmbeddingProviderType::Hash => Ok(Box::new(HashEmbedder::new(
            config.dimension().unwrap_or(DEFAULT_HASH_DIM),
        ))),
    }
}

fn parse_vectors(parsed: Value) -> Result<Vec<Vec<f32>>> {
    let embeddings_value = match parsed {
        Value::Array(arr) => Value::Array(arr),
        Value::Object(ref obj) => {
            if let Some(value) = obj.get("embeddings") {
                value.clone()
            } else if let Some(value) = obj.get("vectors") {
                value.clone()
            } else if let Some(value) = obj.get("data") {
                value.clone()
            } else {
                bail!("Embeddings command output missing 'embeddings' field");
            }
        }
        _ => bail!("Embeddings command output must be JSON array or object"),
    };

    embeddings_value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("Embeddings output must be a JSON array"))?
        .iter()
        .map(|row| {
            row.as_array()
                .ok_or_else(|| anyhow::anyhow!("Embedding row must be an array"))?
                .iter()
                .map(|value| {
                    value
                        .as_f64()
                        .ok_or_else(|| anyhow::anyhow!("Embedding value must be a number"))
                        .map(|v| v as f32)
                })
                .collect::<Result<Vec<f32>>>()
        })
        .collect::<Result<Vec<Vec<f32>>>>()
}

fn truncate_texts<'a>(texts: &'a [String], max_chars: usize) -> Vec<Cow<'a, str>> {
    texts
        .iter()
        .map(|text| truncate_to_chars(text.as_str(), max_chars))
        .collect()
}

fn truncate_to_chars<'a>(input: &'a str, max_chars: usize) -> Cow<'a, str> {
    if max_chars == 0 {
        return Cow::Borrowed("");
    }

    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => Cow::Owned(input[..idx].to_string()),
        None => Cow::Borrowed(input),
    }
}

fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}

fn parse_model_name(raw: &str) -> Result<EmbeddingModel> {
    let value = raw.trim();
    if value.is_empty() {
        return Ok(EmbeddingModel::AllMiniLML6V2);
    }

    match value.to_lowercase().as_str() {
        "minilm"
        | "all-minilm-l6-v2"
        | "allminilm-l6-v2"
        | "sentence-transformers/all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        other => bail!(
            "Unsupported embedding model '{}'. Supported value: {}",
            other,
            DEFAULT_FASTEMBED_MODEL
        ),
    }
}

fn parse_usize_env(name: &str, default: usize) -> Result<usize> {
    match env::var(name) {
        Ok(raw) => {
            let value = raw.trim();
            if value.is_empty() {
                Ok(default)
            } else {
                value
                    .parse::<usize>()
                    .with_context(|| format!("Invalid {} value: {}", name, value))
            }
        }
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("Failed to read {}", name)),
    }
}

fn parse_bool_env(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Ok(raw) => {
            let value = raw.trim().to_lowercase();
            if value.is_empty() {
                return Ok(default);
            }
            match value.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                other => bail!("Invalid {} value: {}", name, other),
            }
        }
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("Failed to read {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_hash_provider_is_deterministic() {
        let mut provider = HashEmbedder::new(64);
        assert_eq!(provider.model_id(), "hash-64");

        let texts = vec!["knee surgery".to_string(), "Knee  SURGERY".to_string()];
        let result = provider.embed_texts(&texts).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].len(), 64);
        assert_eq!(result[0], result[1]);

        let norm: f32 = result[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_provider_empty_text_is_zero_vector() {
        let mut provider = HashEmbedder::new(8);
        let vector = provider.embed_one("   ").unwrap();
        assert_eq!(vector, vec![0.0; 8]);
    }

    #[test]
    fn test_embedder_initializes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let embedder = Embedder::lazy(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(HashEmbedder::new(16)) as Box<dyn EmbeddingProvider>)
        });

        assert!(!embedder.is_initialized());
        embedder.encode_one("first").unwrap();
        embedder.encode(&["second".to_string(), "third".to_string()]).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(embedder.dimension(), Some(16));
    }

    #[test]
    fn test_failed_initialization_is_sticky() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let embedder = Embedder::lazy(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            bail!("model files missing")
        });

        for _ in 0..3 {
            let err = embedder.encode_one("query").unwrap_err();
            assert!(matches!(err, IndexError::EmbeddingUnavailable { .. }));
            assert!(err.to_string().contains("model files missing"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_encode_skips_initialization() {
        let embedder = Embedder::lazy(|| bail!("never built"));
        assert!(embedder.encode(&[]).unwrap().is_empty());
        assert!(!embedder.is_initialized());
    }

    struct ShiftingProvider {
        calls: usize,
    }

    impl EmbeddingProvider for ShiftingProvider {
        fn model_id(&self) -> &str {
            "shifting"
        }

        fn batch_size(&self) -> usize {
            1
        }

        fn embed_texts(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls += 1;
            let dim = if self.calls == 1 { 4 } else { 5 };
            Ok(texts.iter().map(|_| vec![0.5; dim]).collect())
        }
    }

    #[test]
    fn test_dimension_change_is_rejected() {
        let embedder = Embedder::from_provider(Box::new(ShiftingProvider { calls: 0 }));
        assert_eq!(embedder.encode_one("a").unwrap().len(), 4);

        let err = embedder.encode_one("b").unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 4,
                actual: 5
            }
        ));
    }

    #[test]
    fn test_parse_vectors_shapes() {
        let vectors = parse_vectors(serde_json::json!({"embeddings": [[1.0, 2.0], [3.0, 4.0]]}))
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);

        let vectors = parse_vectors(serde_json::json!([[0.5]])).unwrap();
        assert_eq!(vectors, vec![vec![0.5]]);

        assert!(parse_vectors(serde_json::json!({"other": []})).is_err());
        assert!(parse_vectors(serde_json::json!([["x"]])).is_err());
    }

    #[test]
    fn test_truncate_to_chars() {
        let input = "hello";
        assert_eq!(
            truncate_to_chars(input, 2),
            Cow::<str>::Owned("he".to_string())
        );
        assert_eq!(truncate_to_chars(input, 5), Cow::Borrowed(input));
        assert_eq!(truncate_to_chars("héllo", 2), Cow::<str>::Owned("hé".to_string()));
    }

    #[test]
    fn test_parse_model_name() {
        assert!(matches!(
            parse_model_name("all-MiniLM-L6-v2").unwrap(),
            EmbeddingModel::AllMiniLML6V2
        ));
        assert!(parse_model_name("bge-huge").is_err());
    }
}

use crate::config::{EduIndexDirs, EmbeddingSettings, LocalModelSettings};
use crate::error::IndexError;
use crate::traits::Embedder;
use anyhow::{Context, Result};
use fastembed::{
    InitOptions, InitOptionsUserDefined, TextEmbedding, TokenizerFiles, UserDefinedEmbeddingModel,
};
use log::{debug, info};
use std::{fs, path::PathBuf};

const TOKENIZER_FILES: [&str; 4] = [
    "tokenizer.json",
    "config.json",
    "special_tokens_map.json",
    "tokenizer_config.json",
];

/// Local text embedding service using FastEmbed models.
///
/// Either a pre-built FastEmbed model downloaded into the cache directory, or an ONNX
/// model with its tokenizer files read from disk (`[embedding.local_model]`).
pub struct LocalEmbedder {
    model: TextEmbedding,
    dimension: usize,
}

impl LocalEmbedder {
    /// Creates a new embedder with the specified model or default AllMiniLML6V2.
    /// If cache_dir is provided, uses that; otherwise uses EduIndexDirs default.
    pub fn new(
        model_name: Option<fastembed::EmbeddingModel>,
        cache_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let model_name = model_name.unwrap_or(fastembed::EmbeddingModel::AllMiniLML6V2);

        let cache_dir = match cache_dir {
            Some(dir) => dir,
            None => EduIndexDirs::new().ensure_cache_dir()?,
        };

        let init_options = InitOptions::new(model_name.clone()).with_cache_dir(cache_dir);
        let model = TextEmbedding::try_new(init_options)?;
        let dimension = Self::probe_dimension(&model)?;

        info!(
            "Initialized embedding model: {:?} ({} dimensions)",
            model_name, dimension
        );

        Ok(LocalEmbedder { model, dimension })
    }

    /// Creates an embedder from an ONNX file and a tokenizer directory. Nothing is
    /// downloaded.
    pub fn from_local_model(local: &LocalModelSettings) -> Result<Self> {
        let onnx_file = fs::read(&local.onnx_model)
            .with_context(|| format!("Failed to read ONNX model from {:?}", local.onnx_model))?;

        let [tokenizer_file, config_file, special_tokens_map_file, tokenizer_config_file] =
            TOKENIZER_FILES.map(|name| {
                let path = local.tokenizer_dir.join(name);
                fs::read(&path).with_context(|| format!("Failed to read {:?}", path))
            });
        let tokenizer_files = TokenizerFiles {
            tokenizer_file: tokenizer_file?,
            config_file: config_file?,
            special_tokens_map_file: special_tokens_map_file?,
            tokenizer_config_file: tokenizer_config_file?,
        };

        let mut init_options = InitOptionsUserDefined::new();
        if let Some(max_length) = local.max_length {
            init_options = init_options.with_max_length(max_length);
        }
        let model = TextEmbedding::try_new_from_user_defined(
            UserDefinedEmbeddingModel::new(onnx_file, tokenizer_files),
            init_options,
        )?;
        let dimension = Self::probe_dimension(&model)?;

        info!(
            "Initialized local embedding model {:?} ({} dimensions)",
            local.onnx_model, dimension
        );
        Ok(LocalEmbedder { model, dimension })
    }

    /// Creates a new embedder with the default model and default cache directory.
    pub fn new_with_default_model() -> Result<Self> {
        Self::new(None, None)
    }

    /// Creates the embedder described by `settings`, reporting failure as an
    /// unavailable backend so callers can disable similarity search for the session.
    pub fn from_settings(settings: &EmbeddingSettings) -> std::result::Result<Self, IndexError> {
        let unavailable = |reason: String| IndexError::BackendUnavailable {
            backend: "embedding".to_string(),
            reason,
        };
        if !settings.enabled {
            return Err(unavailable("disabled in configuration".to_string()));
        }
        let embedder = match &settings.local_model {
            Some(local) => Self::from_local_model(local),
            None => Self::new(None, settings.model_cache_dir.clone()),
        };
        embedder.map_err(|e| unavailable(format!("{:#}", e)))
    }

    fn probe_dimension(model: &TextEmbedding) -> Result<usize> {
        model
            .embed(vec!["dimension probe"], None)?
            .first()
            .map(Vec::len)
            .ok_or_else(|| anyhow::anyhow!("Embedding model returned no vectors"))
    }

    /// Normalizes an embedding vector using L2 normalization.
    pub fn normalize_l2(embedding: &[f32]) -> Vec<f32> {
        let norm = (embedding.iter().map(|x| x * x).sum::<f32>()).sqrt();
        if norm < 1e-5 {
            debug!(
                "Embedding norm {} is less than 1e-5, returning original embedding",
                norm
            );
            embedding.to_vec()
        } else {
            embedding.iter().map(|x| x / norm).collect()
        }
    }
}

impl Embedder for LocalEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.model
            .embed(vec![text], None)?
            .into_iter()
            .next()
            .map(|x| Self::normalize_l2(&x))
            .ok_or_else(|| anyhow::anyhow!("Failed to get embedding"))
    }

    /// One model call for the whole batch.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let embeddings = self.model.embed(texts.to_vec(), None)?;
        Ok(embeddings.iter().map(|e| Self::normalize_l2(e)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

use crate::error::ConfigError;
use directories::ProjectDirs;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for eduindex project directories
pub struct EduIndexDirs {
    project_dirs: Option<ProjectDirs>,
}

impl EduIndexDirs {
    /// Create a new EduIndexDirs instance
    pub fn new() -> Self {
        let project_dirs = ProjectDirs::from("com", "eduindex", "eduindex");
        Self { project_dirs }
    }

    fn fallback_dir() -> PathBuf {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }

    /// Get the default cache directory for embedding models
    pub fn default_cache_dir(&self) -> PathBuf {
        match &self.project_dirs {
            Some(dirs) => dirs.cache_dir().to_path_buf(),
            None => Self::fallback_dir().join(".cache"),
        }
    }

    /// Get the default directory holding the index files
    pub fn default_data_dir(&self) -> PathBuf {
        match &self.project_dirs {
            Some(dirs) => dirs.data_dir().join("index"),
            None => Self::fallback_dir().join("index_data"),
        }
    }

    /// Get the default JSON record store path
    pub fn default_index_path(&self) -> PathBuf {
        self.default_data_dir().join("resources.json")
    }

    /// Get the default vector artifact path
    pub fn default_vector_path(&self) -> PathBuf {
        self.default_data_dir().join("vectors.db")
    }

    /// Get the default config file path
    pub fn default_config_path(&self) -> PathBuf {
        match &self.project_dirs {
            Some(dirs) => dirs.config_dir().join("config.toml"),
            None => Self::fallback_dir().join("eduindex.toml"),
        }
    }

    /// Ensure the cache directory exists
    pub fn ensure_cache_dir(&self) -> std::io::Result<PathBuf> {
        let cache_dir = self.default_cache_dir();
        std::fs::create_dir_all(&cache_dir)?;
        Ok(cache_dir)
    }
}

impl Default for EduIndexDirs {
    fn default() -> Self {
        Self::new()
    }
}

/// Which search backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process keyword search over the JSON store.
    #[default]
    Simple,
    /// Embedding-based similarity search.
    Vector,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" | "keyword" => Ok(BackendKind::Simple),
            "vector" | "similarity" | "semantic" => Ok(BackendKind::Vector),
            other => Err(format!("unknown backend '{}', expected simple or vector", other)),
        }
    }
}

/// Application settings, usually read from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub index: IndexSettings,
    pub search: SearchSettings,
    pub embedding: EmbeddingSettings,
    pub ingest: IngestSettings,
    pub video: VideoSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// JSON record store; defaults to the project data dir.
    pub path: Option<PathBuf>,
    /// Vector artifact; defaults to `vectors.db` next to the JSON store.
    pub vector_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub backend: BackendKind,
    pub query_cache_size: usize,
    pub default_limit: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Simple,
            query_cache_size: 256,
            default_limit: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub enabled: bool,
    pub model_cache_dir: Option<PathBuf>,
    /// Loads an ONNX model from disk instead of downloading the default one.
    pub local_model: Option<LocalModelSettings>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            model_cache_dir: None,
            local_model: None,
        }
    }
}

/// A user-supplied ONNX model. `tokenizer_dir` holds tokenizer.json, config.json,
/// special_tokens_map.json and tokenizer_config.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalModelSettings {
    pub onnx_model: PathBuf,
    pub tokenizer_dir: PathBuf,
    #[serde(default)]
    pub max_length: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Per-file extraction budget in seconds; 0 disables the bound.
    pub timeout_secs: u64,
    /// Extraction worker threads; 0 uses the rayon default.
    pub threads: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            threads: 0,
        }
    }
}

impl IngestSettings {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    pub ffprobe: String,
    pub ffmpeg: String,
    pub transcriber: Option<TranscriberSettings>,
    pub language: Option<String>,
    /// Where temporary audio files go; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            ffprobe: "ffprobe".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            transcriber: None,
            language: None,
            scratch_dir: None,
        }
    }
}

/// External speech-to-text command. `{audio}` in `args` is replaced with the WAV path and
/// the transcript is read from stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriberSettings {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Load settings from the default config location, or defaults when absent
    pub fn discover() -> Result<Self, ConfigError> {
        let path = EduIndexDirs::new().default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            debug!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.index
            .path
            .clone()
            .unwrap_or_else(|| EduIndexDirs::new().default_index_path())
    }

    pub fn vector_path(&self) -> PathBuf {
        match (&self.index.vector_path, &self.index.path) {
            (Some(path), _) => path.clone(),
            (None, Some(index)) => index.with_file_name("vectors.db"),
            (None, None) => EduIndexDirs::new().default_vector_path(),
        }
    }
}

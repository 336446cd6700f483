use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Config;

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub api_keys: Option<ApiKeysConfig>,
    pub embedding: Option<EmbeddingConfig>,
    pub concurrency: Option<ConcurrencyConfig>,
    pub sources: Option<SourcesConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeysConfig {
    pub crossref_mailto: Option<String>,
    pub ncbi_email: Option<String>,
    pub ncbi_api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub url: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub num_workers: Option<usize>,
    pub source_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Direct-link sources to skip, e.g. `["bioRxiv"]`.
    pub disabled: Option<Vec<String>>,
}

/// Platform config directory path: `<config_dir>/pre2pub/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("pre2pub").join("config.toml"))
}

/// Load config by cascading CWD `.pre2pub.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".pre2pub.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable config file");
            None
        }
    }
}

/// Field of `overlay` if set, else field of `base`.
fn pick<S, T>(overlay: &Option<S>, base: &Option<S>, field: impl Fn(&S) -> Option<T>) -> Option<T> {
    overlay
        .as_ref()
        .and_then(&field)
        .or_else(|| base.as_ref().and_then(&field))
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        api_keys: Some(ApiKeysConfig {
            crossref_mailto: pick(&overlay.api_keys, &base.api_keys, |a| {
                a.crossref_mailto.clone()
            }),
            ncbi_email: pick(&overlay.api_keys, &base.api_keys, |a| a.ncbi_email.clone()),
            ncbi_api_key: pick(&overlay.api_keys, &base.api_keys, |a| a.ncbi_api_key.clone()),
        }),
        embedding: Some(EmbeddingConfig {
            url: pick(&overlay.embedding, &base.embedding, |e| e.url.clone()),
            model: pick(&overlay.embedding, &base.embedding, |e| e.model.clone()),
        }),
        concurrency: Some(ConcurrencyConfig {
            num_workers: pick(&overlay.concurrency, &base.concurrency, |c| c.num_workers),
            source_timeout_secs: pick(&overlay.concurrency, &base.concurrency, |c| {
                c.source_timeout_secs
            }),
        }),
        sources: Some(SourcesConfig {
            disabled: pick(&overlay.sources, &base.sources, |s| s.disabled.clone()),
        }),
    }
}

impl ConfigFile {
    /// Copy every value set in this file onto `config`.
    ///
    /// Rate limiters are not touched; rebuild them once all layers are applied.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(ref keys) = self.api_keys {
            if let Some(ref v) = keys.crossref_mailto {
                config.crossref_mailto = Some(v.clone());
            }
            if let Some(ref v) = keys.ncbi_email {
                config.ncbi_email = Some(v.clone());
            }
            if let Some(ref v) = keys.ncbi_api_key {
                config.ncbi_api_key = Some(v.clone());
            }
        }
        if let Some(ref emb) = self.embedding {
            if let Some(ref url) = emb.url {
                config.embedding_url = url.clone();
            }
            if let Some(ref model) = emb.model {
                config.embedding_model = model.clone();
            }
        }
        if let Some(ref conc) = self.concurrency {
            if let Some(n) = conc.num_workers {
                config.num_workers = n.max(1);
            }
            if let Some(secs) = conc.source_timeout_secs {
                config.source_timeout_secs = secs;
            }
        }
        if let Some(disabled) = self.sources.as_ref().and_then(|s| s.disabled.as_ref()) {
            config.disabled_sources = disabled.clone();
        }
    }
}

//! On-disk TOML configuration.
//!
//! Cascade: built-in defaults, then the platform config file, then a
//! `.refsolve.toml` in the working directory, then CLI flags. All fields
//! are optional so partial configs merge cleanly.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Config;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub cache: Option<CacheConfig>,
    pub network: Option<NetworkConfig>,
    pub resolution: Option<ResolutionConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    pub path: Option<String>,
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub rate_limit_interval_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub fetch_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolutionConfig {
    pub fuzzy_threshold: Option<f64>,
    pub fuzzy_margin: Option<f64>,
    pub title_weight: Option<f64>,
    pub num_workers: Option<usize>,
    pub strict: Option<bool>,
}

/// Platform config path: `<config_dir>/refsolve/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("refsolve").join("config.toml"))
}

/// Load config by cascading CWD `.refsolve.toml` over the platform config.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".refsolve.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. `None` if missing or unparseable.
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

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    let base_cache = base.cache.unwrap_or_default();
    let over_cache = overlay.cache.unwrap_or_default();
    let base_net = base.network.unwrap_or_default();
    let over_net = overlay.network.unwrap_or_default();
    let base_res = base.resolution.unwrap_or_default();
    let over_res = overlay.resolution.unwrap_or_default();

    ConfigFile {
        cache: Some(CacheConfig {
            path: over_cache.path.or(base_cache.path),
            ttl_secs: over_cache.ttl_secs.or(base_cache.ttl_secs),
        }),
        network: Some(NetworkConfig {
            rate_limit_interval_ms: over_net
                .rate_limit_interval_ms
                .or(base_net.rate_limit_interval_ms),
            max_retries: over_net.max_retries.or(base_net.max_retries),
            fetch_timeout_secs: over_net.fetch_timeout_secs.or(base_net.fetch_timeout_secs),
        }),
        resolution: Some(ResolutionConfig {
            fuzzy_threshold: over_res.fuzzy_threshold.or(base_res.fuzzy_threshold),
            fuzzy_margin: over_res.fuzzy_margin.or(base_res.fuzzy_margin),
            title_weight: over_res.title_weight.or(base_res.title_weight),
            num_workers: over_res.num_workers.or(base_res.num_workers),
            strict: over_res.strict.or(base_res.strict),
        }),
    }
}

impl ConfigFile {
    /// Overlay the file's values onto a [`Config`]. The caller still runs
    /// [`Config::validate`] afterwards.
    pub fn apply(&self, config: &mut Config) {
        if let Some(ref cache) = self.cache {
            if let Some(ref path) = cache.path {
                config.cache_path = Some(PathBuf::from(path));
            }
            if let Some(ttl) = cache.ttl_secs {
                config.cache_ttl_secs = ttl;
            }
        }
        if let Some(ref network) = self.network {
            if let Some(interval) = network.rate_limit_interval_ms {
                config.rate_limit_interval_ms = interval;
            }
            if let Some(retries) = network.max_retries {
                config.max_retries = retries;
            }
            if let Some(timeout) = network.fetch_timeout_secs {
                config.fetch_timeout_secs = timeout;
            }
        }
        if let Some(ref resolution) = self.resolution {
            if let Some(threshold) = resolution.fuzzy_threshold {
                config.fuzzy_threshold = threshold;
            }
            if let Some(margin) = resolution.fuzzy_margin {
                config.fuzzy_margin = margin;
            }
            if let Some(weight) = resolution.title_weight {
                config.title_weight = weight;
            }
            if let Some(workers) = resolution.num_workers {
                config.num_workers = workers;
            }
            if let Some(strict) = resolution.strict {
                config.strict = strict;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_toml() {
        let config = ConfigFile {
            cache: Some(CacheConfig {
                path: Some("/tmp/refsolve/cache.db".into()),
                ttl_secs: Some(3600),
            }),
            ..Default::default()
        };
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: ConfigFile = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.cache.unwrap().ttl_secs, Some(3600));
    }

    #[test]
    fn partial_config_parses() {
        let parsed: ConfigFile =
            toml::from_str("[resolution]\nfuzzy_threshold = 0.9\n").unwrap();
        assert_eq!(parsed.resolution.unwrap().fuzzy_threshold, Some(0.9));
        assert!(parsed.cache.is_none());
    }

    #[test]
    fn merge_overlay_wins() {
        let base = ConfigFile {
            network: Some(NetworkConfig {
                max_retries: Some(5),
                rate_limit_interval_ms: Some(2000),
                ..Default::default()
            }),
            ..Default::default()
        };
        let overlay = ConfigFile {
            network: Some(NetworkConfig {
                max_retries: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = merge(base, overlay);
        let network = merged.network.unwrap();
        assert_eq!(network.max_retries, Some(1));
        assert_eq!(network.rate_limit_interval_ms, Some(2000));
    }

    #[test]
    fn apply_overrides_only_present_fields() {
        let file = ConfigFile {
            resolution: Some(ResolutionConfig {
                fuzzy_threshold: Some(0.9),
                strict: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut config = Config::default();
        let workers_before = config.num_workers;
        file.apply(&mut config);

        assert_eq!(config.fuzzy_threshold, 0.9);
        assert!(config.strict);
        assert_eq!(config.num_workers, workers_before);
    }

    #[test]
    fn unparseable_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "not [valid toml").unwrap();
        assert!(load_from_path(&path).is_none());
    }
}

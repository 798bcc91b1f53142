use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Config;

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub cache: Option<CacheConfig>,
    pub search: Option<SearchConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    pub search_ttl_secs: Option<u64>,
    pub search_capacity: Option<usize>,
    pub detail_ttl_secs: Option<u64>,
    pub detail_capacity: Option<usize>,
    pub history_ttl_secs: Option<u64>,
    pub history_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchConfig {
    pub default_page_size: Option<u32>,
}

/// Platform config directory path: `<config_dir>/refdesk/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("refdesk").join("config.toml"))
}

/// Load config by cascading CWD `.refdesk.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(&PathBuf::from(".refdesk.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &PathBuf) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        cache: Some(CacheConfig {
            search_ttl_secs: overlay
                .cache
                .as_ref()
                .and_then(|c| c.search_ttl_secs)
                .or_else(|| base.cache.as_ref().and_then(|c| c.search_ttl_secs)),
            search_capacity: overlay
                .cache
                .as_ref()
                .and_then(|c| c.search_capacity)
                .or_else(|| base.cache.as_ref().and_then(|c| c.search_capacity)),
            detail_ttl_secs: overlay
                .cache
                .as_ref()
                .and_then(|c| c.detail_ttl_secs)
                .or_else(|| base.cache.as_ref().and_then(|c| c.detail_ttl_secs)),
            detail_capacity: overlay
                .cache
                .as_ref()
                .and_then(|c| c.detail_capacity)
                .or_else(|| base.cache.as_ref().and_then(|c| c.detail_capacity)),
            history_ttl_secs: overlay
                .cache
                .as_ref()
                .and_then(|c| c.history_ttl_secs)
                .or_else(|| base.cache.as_ref().and_then(|c| c.history_ttl_secs)),
            history_capacity: overlay
                .cache
                .as_ref()
                .and_then(|c| c.history_capacity)
                .or_else(|| base.cache.as_ref().and_then(|c| c.history_capacity)),
        }),
        search: Some(SearchConfig {
            default_page_size: overlay
                .search
                .as_ref()
                .and_then(|s| s.default_page_size)
                .or_else(|| base.search.as_ref().and_then(|s| s.default_page_size)),
        }),
    }
}

/// Overlay file values onto a runtime config; absent fields keep the
/// defaults.
pub fn apply(file: &ConfigFile, mut config: Config) -> Config {
    if let Some(cache) = &file.cache {
        if let Some(secs) = cache.search_ttl_secs {
            config.search_cache.ttl = Duration::from_secs(secs);
        }
        if let Some(capacity) = cache.search_capacity {
            config.search_cache.capacity = capacity;
        }
        if let Some(secs) = cache.detail_ttl_secs {
            config.detail_cache.ttl = Duration::from_secs(secs);
        }
        if let Some(capacity) = cache.detail_capacity {
            config.detail_cache.capacity = capacity;
        }
        if let Some(secs) = cache.history_ttl_secs {
            config.history_cache.ttl = Duration::from_secs(secs);
        }
        if let Some(capacity) = cache.history_capacity {
            config.history_cache.capacity = capacity;
        }
    }
    if let Some(search) = &file.search {
        if let Some(size) = search.default_page_size {
            config.default_page_size = size;
        }
    }
    config
}

/// Save the current config to the platform config directory.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf, String> {
    let path = config_path().ok_or_else(|| "Could not determine config directory".to_string())?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let content =
        toml::to_string_pretty(config).map_err(|e| format!("Failed to serialize config: {}", e))?;
    std::fs::write(&path, content).map_err(|e| format!("Failed to write config: {}", e))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_section_round_trips_through_toml() {
        let config = ConfigFile {
            cache: Some(CacheConfig {
                search_ttl_secs: Some(30),
                ..Default::default()
            }),
            ..Default::default()
        };
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: ConfigFile = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.cache.unwrap().search_ttl_secs.unwrap(), 30);
    }

    #[test]
    fn absent_fields_deserialize_as_none() {
        let toml_str = "[cache]\nsearch_ttl_secs = 15\n";
        let parsed: ConfigFile = toml::from_str(toml_str).unwrap();
        let cache = parsed.cache.unwrap();
        assert_eq!(cache.search_ttl_secs, Some(15));
        assert!(cache.detail_capacity.is_none());
        assert!(parsed.search.is_none());
    }

    #[test]
    fn merge_overlay_wins() {
        let base = ConfigFile {
            cache: Some(CacheConfig {
                search_ttl_secs: Some(60),
                detail_capacity: Some(500),
                ..Default::default()
            }),
            ..Default::default()
        };
        let overlay = ConfigFile {
            cache: Some(CacheConfig {
                search_ttl_secs: Some(10),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = merge(base, overlay);
        let cache = merged.cache.unwrap();
        assert_eq!(cache.search_ttl_secs, Some(10));
        // Base value survives where the overlay is silent.
        assert_eq!(cache.detail_capacity, Some(500));
    }

    #[test]
    fn apply_overrides_only_the_set_fields() {
        let file = ConfigFile {
            cache: Some(CacheConfig {
                search_ttl_secs: Some(5),
                history_capacity: Some(42),
                ..Default::default()
            }),
            search: Some(SearchConfig {
                default_page_size: Some(25),
            }),
        };
        let config = apply(&file, Config::default());
        assert_eq!(config.search_cache.ttl, Duration::from_secs(5));
        assert_eq!(config.history_cache.capacity, 42);
        assert_eq!(config.default_page_size, 25);
        // Untouched families keep their defaults.
        assert_eq!(config.detail_cache.capacity, Config::default().detail_cache.capacity);
    }

    #[test]
    fn apply_empty_file_keeps_defaults() {
        let config = apply(&ConfigFile::default(), Config::default());
        let defaults = Config::default();
        assert_eq!(config.search_cache.ttl, defaults.search_cache.ttl);
        assert_eq!(config.default_page_size, defaults.default_page_size);
    }

    #[test]
    fn load_from_path_reads_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[search]\ndefault_page_size = 20\n").unwrap();

        let parsed = load_from_path(&path).unwrap();
        assert_eq!(parsed.search.unwrap().default_page_size, Some(20));
        assert!(load_from_path(&dir.path().join("missing.toml")).is_none());
    }
}

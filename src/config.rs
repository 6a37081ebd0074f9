//! Configuration (§6): the ten keys the core reads, bundled into one
//! typed struct with a single `Default` impl rather than scattering bare
//! constants through the caching code.

/// Reads a single named configuration key. Callers adapt their own
/// config-file/env layer to this; the crate does not hard-depend on any
/// particular format.
pub trait ConfigSource {
    fn get_u64(&self, key: &str, default: u64) -> u64;
    fn get_bool(&self, key: &str, default: bool) -> bool;
}

/// All entity-iterable-cache-relevant configuration, resolved once at
/// startup.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub entity_iterable_cache_size: usize,
    pub entity_iterable_cache_counts_cache_size: usize,
    pub entity_iterable_cache_thread_count: usize,
    pub entity_iterable_cache_deferred_delay_ms: u64,
    pub entity_iterable_cache_caching_timeout_ms: u64,
    pub entity_iterable_cache_counts_caching_timeout_ms: u64,
    pub entity_iterable_cache_start_caching_timeout_ms: u64,
    pub env_monitor_txns_check_freq_ms: u64,
    pub is_caching_disabled: bool,
    pub entity_iterable_cache_use_human_readable: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            entity_iterable_cache_size: 8192,
            entity_iterable_cache_counts_cache_size: 4096,
            entity_iterable_cache_thread_count: num_cpus::get().max(2),
            entity_iterable_cache_deferred_delay_ms: 2_000,
            entity_iterable_cache_caching_timeout_ms: 10_000,
            entity_iterable_cache_counts_caching_timeout_ms: 1_000,
            entity_iterable_cache_start_caching_timeout_ms: 500,
            env_monitor_txns_check_freq_ms: 60_000,
            is_caching_disabled: false,
            entity_iterable_cache_use_human_readable: false,
        }
    }
}

impl CacheConfig {
    pub fn from_source(source: &dyn ConfigSource) -> Self {
        let defaults = CacheConfig::default();
        CacheConfig {
            entity_iterable_cache_size: source.get_u64("entityIterableCacheSize", defaults.entity_iterable_cache_size as u64) as usize,
            entity_iterable_cache_counts_cache_size: source
                .get_u64("entityIterableCacheCountsCacheSize", defaults.entity_iterable_cache_counts_cache_size as u64)
                as usize,
            entity_iterable_cache_thread_count: source
                .get_u64("entityIterableCacheThreadCount", defaults.entity_iterable_cache_thread_count as u64)
                as usize,
            entity_iterable_cache_deferred_delay_ms: source
                .get_u64("entityIterableCacheDeferredDelay", defaults.entity_iterable_cache_deferred_delay_ms),
            entity_iterable_cache_caching_timeout_ms: source
                .get_u64("entityIterableCacheCachingTimeout", defaults.entity_iterable_cache_caching_timeout_ms),
            entity_iterable_cache_counts_caching_timeout_ms: source.get_u64(
                "entityIterableCacheCountsCachingTimeout",
                defaults.entity_iterable_cache_counts_caching_timeout_ms,
            ),
            entity_iterable_cache_start_caching_timeout_ms: source.get_u64(
                "entityIterableCacheStartCachingTimeout",
                defaults.entity_iterable_cache_start_caching_timeout_ms,
            ),
            env_monitor_txns_check_freq_ms: source.get_u64("envMonitorTxnsCheckFreq", defaults.env_monitor_txns_check_freq_ms),
            is_caching_disabled: source.get_bool("isCachingDisabled", defaults.is_caching_disabled),
            entity_iterable_cache_use_human_readable: source
                .get_bool("entityIterableCacheUseHumanReadable", defaults.entity_iterable_cache_use_human_readable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapConfigSource(HashMap<&'static str, String>);

    impl ConfigSource for MapConfigSource {
        fn get_u64(&self, key: &str, default: u64) -> u64 {
            self.0.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        }

        fn get_bool(&self, key: &str, default: bool) -> bool {
            self.0.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        }
    }

    #[test]
    fn unset_keys_fall_back_to_defaults() {
        let source = MapConfigSource(HashMap::new());
        let config = CacheConfig::from_source(&source);
        assert_eq!(config.entity_iterable_cache_size, CacheConfig::default().entity_iterable_cache_size);
    }

    #[test]
    fn set_keys_override_defaults() {
        let mut map = HashMap::new();
        map.insert("isCachingDisabled", "true".to_string());
        map.insert("entityIterableCacheDeferredDelay", "999".to_string());
        let source = MapConfigSource(map);
        let config = CacheConfig::from_source(&source);
        assert!(config.is_caching_disabled);
        assert_eq!(config.entity_iterable_cache_deferred_delay_ms, 999);
    }
}

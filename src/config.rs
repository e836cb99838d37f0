use std::env;
use tracing::warn;

/// User-Agent sent upstream when `USER_AGENTS_JSON` is absent or unusable
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Accept-Language synthesized when the inbound request carries none
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8";

/// Default TTL (seconds) for both cache namespaces and `Cache-Control: max-age`
pub const DEFAULT_CACHE_TTL_SECS: u64 = 86_400;

/// Default limit for nested master playlists
pub const DEFAULT_MAX_RECURSION: u32 = 5;

/// Cache store selection
#[derive(Clone, Debug, PartialEq)]
pub enum CacheBackendType {
    /// In-process TTL map
    Memory,
    /// External Valkey/Redis store (requires the `valkey` feature)
    Valkey,
    /// No store bound: every read misses, every write is skipped
    Disabled,
}

impl CacheBackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheBackendType::Memory => "memory",
            CacheBackendType::Valkey => "valkey",
            CacheBackendType::Disabled => "none",
        }
    }
}

/// Relay configuration, built once at startup and shared read-only
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// Enables diagnostic (debug-level) logging
    pub debug: bool,
    /// TTL in seconds for cached entries and the `Cache-Control` header
    pub cache_ttl_secs: u64,
    /// Maximum master-playlist nesting before the request is aborted
    pub max_recursion: u32,
    /// Pool the fetcher draws its User-Agent from. Never empty.
    pub user_agents: Vec<String>,
    /// Accept-Language sent upstream when the client sent none
    pub default_accept_language: String,
    /// Cache store backend
    pub cache_backend: CacheBackendType,
    /// Valkey/Redis URL (used when cache_backend = Valkey)
    pub valkey_url: Option<String>,
    /// Access gate password; `None` leaves the proxy open
    pub password: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            debug: false,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            max_recursion: DEFAULT_MAX_RECURSION,
            user_agents: vec![DEFAULT_USER_AGENT.to_string()],
            default_accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            cache_backend: CacheBackendType::Memory,
            valkey_url: None,
            password: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unparsable numbers fall back to their defaults. Only settings that
    /// cannot degrade (valkey without a URL) are reported as errors.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let defaults = Config::default();

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()?;

        let debug = env::var("DEBUG")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let cache_ttl_secs = env::var("CACHE_TTL")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_CACHE_TTL_SECS);

        let max_recursion = env::var("MAX_RECURSION")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_MAX_RECURSION);

        let user_agents = match env::var("USER_AGENTS_JSON") {
            Ok(json) => parse_user_agents(&json),
            Err(_) => defaults.user_agents,
        };

        let default_accept_language = env::var("DEFAULT_ACCEPT_LANGUAGE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.default_accept_language);

        let cache_backend = match env::var("CACHE_BACKEND")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase()
            .as_str()
        {
            "valkey" | "redis" => CacheBackendType::Valkey,
            "none" | "off" | "disabled" => CacheBackendType::Disabled,
            _ => CacheBackendType::Memory,
        };
        let valkey_url = env::var("VALKEY_URL").ok();
        if cache_backend == CacheBackendType::Valkey && valkey_url.is_none() {
            return Err("VALKEY_URL is required when CACHE_BACKEND=valkey".into());
        }

        let password = env::var("PASSWORD").ok().filter(|p| !p.is_empty());

        Ok(Config {
            port,
            debug,
            cache_ttl_secs,
            max_recursion,
            user_agents,
            default_accept_language,
            cache_backend,
            valkey_url,
            password,
        })
    }
}

/// Parse `USER_AGENTS_JSON`. Anything but a non-empty array of strings
/// yields the single built-in default.
pub fn parse_user_agents(json: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(json) {
        Ok(agents) if !agents.is_empty() => agents,
        Ok(_) => {
            warn!("USER_AGENTS_JSON is empty, using default User-Agent");
            vec![DEFAULT_USER_AGENT.to_string()]
        }
        Err(e) => {
            warn!("Failed to parse USER_AGENTS_JSON ({}), using default User-Agent", e);
            vec![DEFAULT_USER_AGENT.to_string()]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serialize all env-var tests to prevent races between parallel test threads.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ALL_VARS: &[&str] = &[
        "PORT",
        "DEBUG",
        "CACHE_TTL",
        "MAX_RECURSION",
        "USER_AGENTS_JSON",
        "DEFAULT_ACCEPT_LANGUAGE",
        "CACHE_BACKEND",
        "VALKEY_URL",
        "PASSWORD",
    ];

    /// Clear every relay variable, set `set`, run `f`, then restore original state.
    fn with_env(set: &[(&str, &str)], f: impl FnOnce()) {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());

        let saved: Vec<(&str, Option<String>)> =
            ALL_VARS.iter().map(|k| (*k, std::env::var(k).ok())).collect();

        for k in ALL_VARS {
            // SAFETY: serialized by ENV_LOCK, no other thread modifies env vars concurrently.
            unsafe { std::env::remove_var(k) };
        }
        for (k, v) in set {
            unsafe { std::env::set_var(k, v) };
        }

        f();

        for (k, old) in saved {
            match old {
                Some(v) => unsafe { std::env::set_var(k, v) },
                None => unsafe { std::env::remove_var(k) },
            }
        }
    }

    #[test]
    fn defaults_without_env() {
        with_env(&[], || {
            let config = Config::from_env().expect("defaults should load");
            assert_eq!(config.port, 3000);
            assert!(!config.debug);
            assert_eq!(config.cache_ttl_secs, 86_400);
            assert_eq!(config.max_recursion, 5);
            assert_eq!(config.user_agents, vec![DEFAULT_USER_AGENT.to_string()]);
            assert_eq!(config.cache_backend, CacheBackendType::Memory);
            assert!(config.password.is_none());
        });
    }

    #[test]
    fn debug_flag_only_accepts_true() {
        with_env(&[("DEBUG", "true")], || {
            assert!(Config::from_env().unwrap().debug);
        });
        with_env(&[("DEBUG", "1")], || {
            assert!(!Config::from_env().unwrap().debug);
        });
    }

    #[test]
    fn numeric_settings_parsed() {
        with_env(&[("CACHE_TTL", "600"), ("MAX_RECURSION", "2")], || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.cache_ttl_secs, 600);
            assert_eq!(config.max_recursion, 2);
        });
    }

    #[test]
    fn garbage_numbers_fall_back_to_defaults() {
        with_env(&[("CACHE_TTL", "soon"), ("MAX_RECURSION", "-1")], || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.cache_ttl_secs, DEFAULT_CACHE_TTL_SECS);
            assert_eq!(config.max_recursion, DEFAULT_MAX_RECURSION);
        });
    }

    #[test]
    fn user_agents_from_json() {
        with_env(&[("USER_AGENTS_JSON", r#"["ua-one","ua-two"]"#)], || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.user_agents, vec!["ua-one", "ua-two"]);
        });
    }

    #[test]
    fn invalid_or_empty_user_agents_fall_back() {
        assert_eq!(parse_user_agents("[]"), vec![DEFAULT_USER_AGENT]);
        assert_eq!(parse_user_agents("not json"), vec![DEFAULT_USER_AGENT]);
        assert_eq!(parse_user_agents(r#"{"ua":"x"}"#), vec![DEFAULT_USER_AGENT]);
        assert_eq!(parse_user_agents("[1,2]"), vec![DEFAULT_USER_AGENT]);
    }

    #[test]
    fn cache_backend_selection() {
        with_env(&[("CACHE_BACKEND", "none")], || {
            assert_eq!(
                Config::from_env().unwrap().cache_backend,
                CacheBackendType::Disabled
            );
        });
        with_env(
            &[("CACHE_BACKEND", "redis"), ("VALKEY_URL", "redis://127.0.0.1/")],
            || {
                assert_eq!(
                    Config::from_env().unwrap().cache_backend,
                    CacheBackendType::Valkey
                );
            },
        );
    }

    #[test]
    fn valkey_requires_url() {
        with_env(&[("CACHE_BACKEND", "valkey")], || {
            assert!(Config::from_env().is_err());
        });
    }

    #[test]
    fn empty_password_leaves_gate_open() {
        with_env(&[("PASSWORD", "")], || {
            assert!(Config::from_env().unwrap().password.is_none());
        });
    }
}

//! Configuration loading and resolution.

use std::time::Duration;

/// Public origin of the sole proprietorship registry.
pub const REGISTRY_ORIGIN: &str = "https://pretrazivac-obrta.gov.hr";

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CACHE_CAPACITY: u64 = 100;
const DEFAULT_CACHE_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) \
                                  AppleWebKit/537.36 (KHTML, like Gecko) \
                                  Chrome/131.0.0.0 Safari/537.36";

/// Bounds for one result cache instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub capacity: u64,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
        }
    }
}

/// Settings for the tesseract subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrConfig {
    pub binary: String,
    pub dpi: u32,
    pub language: String,
    pub timeout: Duration,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            binary: "tesseract".to_string(),
            dpi: 70,
            language: "digits".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Top-level configuration for the registry core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Registry origin. Endpoint paths are fixed; only the origin moves,
    /// which lets tests point the client at a local server.
    pub origin: String,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub ocr: OcrConfig,
    pub detail_cache: CacheConfig,
    pub search_cache: CacheConfig,
    /// When false both caches are bypassed.
    pub cache_enabled: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            origin: REGISTRY_ORIGIN.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            ocr: OcrConfig::default(),
            detail_cache: CacheConfig::default(),
            search_cache: CacheConfig::default(),
            cache_enabled: true,
        }
    }
}

impl RegistryConfig {
    /// Defaults overlaid with `PORTOR_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`RegistryConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(origin) = lookup("PORTOR_ORIGIN") {
            config.origin = origin.trim_end_matches('/').to_string();
        }
        if let Some(secs) = parse_var(&lookup, "PORTOR_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(binary) = lookup("PORTOR_TESSERACT") {
            config.ocr.binary = binary;
        }
        if let Some(dpi) = parse_var(&lookup, "PORTOR_OCR_DPI") {
            config.ocr.dpi = dpi;
        }
        if let Some(language) = lookup("PORTOR_OCR_LANGUAGE") {
            config.ocr.language = language;
        }
        if let Some(secs) = parse_var(&lookup, "PORTOR_OCR_TIMEOUT_SECS") {
            config.ocr.timeout = Duration::from_secs(secs);
        }
        if let Some(capacity) = parse_var(&lookup, "PORTOR_CACHE_CAPACITY") {
            config.detail_cache.capacity = capacity;
            config.search_cache.capacity = capacity;
        }
        if let Some(secs) = parse_var(&lookup, "PORTOR_CACHE_TTL_SECS") {
            config.detail_cache.ttl = Duration::from_secs(secs);
            config.search_cache.ttl = Duration::from_secs(secs);
        }
        if let Some(disabled) = parse_var::<bool, _>(&lookup, "PORTOR_CACHE_DISABLED") {
            config.cache_enabled = !disabled;
        }

        config
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints::new(&self.origin)
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring {name}={raw:?}: not a valid value");
            None
        }
    }
}

/// Fixed registry endpoint paths resolved against an origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    origin: String,
}

impl Endpoints {
    pub fn new(origin: &str) -> Self {
        Self {
            origin: origin.trim_end_matches('/').to_string(),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn captcha(&self) -> String {
        format!("{}/captcha/image.png", self.origin)
    }

    pub fn search_form(&self) -> String {
        format!("{}/pretraga.htm", self.origin)
    }

    pub fn listing(&self) -> String {
        format!("{}/pretraga.htm?izvrsiDohvat", self.origin)
    }

    pub fn detail(&self, registry_id: &str) -> String {
        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("id", registry_id)
            .finish();
        format!("{}/detalji.htm?{query}", self.origin)
    }
}

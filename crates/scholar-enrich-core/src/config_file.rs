use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Config;

/// On-disk TOML configuration.
/// Every field is optional so partial files layer over the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub api: Option<ApiConfig>,
    pub features: Option<FeaturesConfig>,
    pub limits: Option<LimitsConfig>,
    pub sources: Option<SourcesConfig>,
    pub selectors: Option<SelectorsConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    pub contact_email: Option<String>,
    pub s2_api_key: Option<String>,
    pub core_api_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeaturesConfig {
    pub fulltext: Option<bool>,
    pub html_scraping: Option<bool>,
    pub nlp_keywords: Option<bool>,
    pub acs: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_papers: Option<usize>,
    pub api_timeout_secs: Option<u64>,
    pub page_timeout_secs: Option<u64>,
    pub polite_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub disabled: Option<Vec<String>>,
}

/// CSS selector lists, versioned alongside publisher markup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectorsConfig {
    pub ssrn: Option<Vec<String>>,
    pub acs: Option<Vec<String>>,
    pub html_meta: Option<Vec<String>>,
}

/// Platform config directory path: `<config_dir>/scholar-enrich/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("scholar-enrich").join("config.toml"))
}

/// Load config by cascading CWD `.scholar-enrich.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".scholar-enrich.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. `None` if the file is missing or
/// unparseable (the latter is logged).
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

/// Field from `overlay` if set, else from `base`.
fn pick<S, T>(
    overlay: &Option<S>,
    base: &Option<S>,
    field: impl Fn(&S) -> Option<T>,
) -> Option<T> {
    overlay
        .as_ref()
        .and_then(&field)
        .or_else(|| base.as_ref().and_then(&field))
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        api: Some(ApiConfig {
            contact_email: pick(&overlay.api, &base.api, |a| a.contact_email.clone()),
            s2_api_key: pick(&overlay.api, &base.api, |a| a.s2_api_key.clone()),
            core_api_key: pick(&overlay.api, &base.api, |a| a.core_api_key.clone()),
        }),
        features: Some(FeaturesConfig {
            fulltext: pick(&overlay.features, &base.features, |f| f.fulltext),
            html_scraping: pick(&overlay.features, &base.features, |f| f.html_scraping),
            nlp_keywords: pick(&overlay.features, &base.features, |f| f.nlp_keywords),
            acs: pick(&overlay.features, &base.features, |f| f.acs),
        }),
        limits: Some(LimitsConfig {
            max_papers: pick(&overlay.limits, &base.limits, |l| l.max_papers),
            api_timeout_secs: pick(&overlay.limits, &base.limits, |l| l.api_timeout_secs),
            page_timeout_secs: pick(&overlay.limits, &base.limits, |l| l.page_timeout_secs),
            polite_delay_ms: pick(&overlay.limits, &base.limits, |l| l.polite_delay_ms),
        }),
        sources: Some(SourcesConfig {
            disabled: pick(&overlay.sources, &base.sources, |s| s.disabled.clone()),
        }),
        selectors: Some(SelectorsConfig {
            ssrn: pick(&overlay.selectors, &base.selectors, |s| s.ssrn.clone()),
            acs: pick(&overlay.selectors, &base.selectors, |s| s.acs.clone()),
            html_meta: pick(&overlay.selectors, &base.selectors, |s| s.html_meta.clone()),
        }),
    }
}

/// Overlay the values present in `file` onto `config`.
pub fn apply_file(file: &ConfigFile, config: &mut Config) {
    if let Some(api) = &file.api {
        if let Some(v) = &api.contact_email {
            config.contact_email = Some(v.clone());
        }
        if let Some(v) = &api.s2_api_key {
            config.s2_api_key = Some(v.clone());
        }
        if let Some(v) = &api.core_api_key {
            config.core_api_key = Some(v.clone());
        }
    }
    if let Some(features) = &file.features {
        config.enable_fulltext = features.fulltext.unwrap_or(config.enable_fulltext);
        config.enable_html_scraping = features
            .html_scraping
            .unwrap_or(config.enable_html_scraping);
        config.enable_nlp_keywords = features.nlp_keywords.unwrap_or(config.enable_nlp_keywords);
        config.enable_acs = features.acs.unwrap_or(config.enable_acs);
    }
    if let Some(limits) = &file.limits {
        config.max_papers = limits.max_papers.unwrap_or(config.max_papers);
        config.api_timeout_secs = limits.api_timeout_secs.unwrap_or(config.api_timeout_secs);
        config.page_timeout_secs = limits.page_timeout_secs.unwrap_or(config.page_timeout_secs);
        config.polite_delay_ms = limits.polite_delay_ms.unwrap_or(config.polite_delay_ms);
    }
    if let Some(disabled) = file.sources.as_ref().and_then(|s| s.disabled.clone()) {
        config.disabled_sources = disabled;
    }
    if let Some(selectors) = &file.selectors {
        if let Some(v) = &selectors.ssrn {
            config.selectors.ssrn = v.clone();
        }
        if let Some(v) = &selectors.acs {
            config.selectors.acs = v.clone();
        }
        if let Some(v) = &selectors.html_meta {
            config.selectors.html_meta = v.clone();
        }
    }
}

/// Parse a boolean flag: `1/0`, `true/false`, `yes/no`, `on/off`.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Overlay environment variables onto `config`. `lookup` is `std::env::var`
/// in production and a map in tests. Unparseable values are logged and
/// ignored.
pub fn apply_env(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    let flag = |name: &str| -> Option<bool> {
        let raw = get(name)?;
        let parsed = parse_bool(&raw);
        if parsed.is_none() {
            tracing::warn!(variable = name, value = %raw, "ignoring non-boolean value");
        }
        parsed
    };

    fn number<T: std::str::FromStr>(name: &str, raw: Option<String>) -> Option<T> {
        let raw = raw?;
        let parsed = raw.trim().parse().ok();
        if parsed.is_none() {
            tracing::warn!(variable = name, value = %raw, "ignoring non-numeric value");
        }
        parsed
    }

    if let Some(v) = flag("ENABLE_FULLTEXT") {
        config.enable_fulltext = v;
    }
    if let Some(v) = flag("ENABLE_HTML_SCRAPING") {
        config.enable_html_scraping = v;
    }
    // both spellings; the corrected one wins when both are set
    if let Some(v) = flag("ENABLE_NLP_KEYWORDS").or_else(|| flag("ENABLE_NLP_KEYYWORDS")) {
        config.enable_nlp_keywords = v;
    }
    if let Some(v) = flag("ENABLE_ACS") {
        config.enable_acs = v;
    }
    if let Some(v) = number("MAX_PAPERS", get("MAX_PAPERS")) {
        config.max_papers = v;
    }
    if let Some(v) = number("API_TIMEOUT", get("API_TIMEOUT")) {
        config.api_timeout_secs = v;
    }
    if let Some(v) = number("PAGE_TIMEOUT", get("PAGE_TIMEOUT")) {
        config.page_timeout_secs = v;
    }
    if let Some(v) = get("CONTACT_EMAIL") {
        config.contact_email = Some(v.trim().to_string());
    }
    if let Some(v) = get("S2_API_KEY") {
        config.s2_api_key = Some(v.trim().to_string());
    }
    if let Some(v) = get("CORE_API_KEY") {
        config.core_api_key = Some(v.trim().to_string());
    }
    if let Some(v) = get("DISABLED_SOURCES") {
        config.disabled_sources = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }
}

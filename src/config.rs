//! Gateway configuration.
//!
//! Precedence: CLI flags > environment (`UNIRANK_*`) > config files > defaults. Config files are
//! looked up at `--config`, `$UNIRANK_CONFIG` and `./unirank.toml`; every file that exists
//! fills the settings the layers above it left unset.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::{GatewayError, Result};
use crate::query::SortSpec;
use crate::schema::{CITIES, EntityKind, ReviewLayout, Schema, UNIVERSITIES};

/// One source of settings; `None` means "not set here".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    pub data_dir: Option<PathBuf>,
    pub entity_collection: Option<String>,
    pub review_layout: Option<ReviewLayout>,
    pub allow_raw_pipelines: Option<bool>,
    /// Collection name to `field[:asc|desc]`.
    pub default_sort: Option<BTreeMap<String, String>>,
    pub log_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub log_retention: Option<u32>,
    pub qtrace: Option<bool>,
}

fn parse_bool(key: &str, s: &str) -> Result<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(GatewayError::Config(format!("{key}: expected a boolean, got '{other}'"))),
    }
}

impl ConfigLayer {
    /// # Errors
    /// Returns `Config` for invalid TOML or unknown keys.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// # Errors
    /// Returns `Io` when the file cannot be read and `Config` when it does not parse.
    pub fn from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml_str(&s).map_err(|e| GatewayError::Config(format!("{}: {e}", path.display())))
    }

    /// Read `UNIRANK_*` variables through `get`.
    ///
    /// # Errors
    /// Returns `Config` for a value that does not parse.
    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut layer = Self {
            data_dir: get("UNIRANK_DATA_DIR").map(PathBuf::from),
            entity_collection: get("UNIRANK_ENTITY_COLLECTION"),
            log_dir: get("UNIRANK_LOG_DIR").map(PathBuf::from),
            log_level: get("UNIRANK_LOG_LEVEL"),
            ..Self::default()
        };
        if let Some(s) = get("UNIRANK_REVIEW_LAYOUT") {
            layer.review_layout = Some(s.parse()?);
        }
        if let Some(s) = get("UNIRANK_ALLOW_RAW_PIPELINES") {
            layer.allow_raw_pipelines = Some(parse_bool("UNIRANK_ALLOW_RAW_PIPELINES", &s)?);
        }
        if let Some(s) = get("UNIRANK_LOG_RETENTION") {
            let n = s.trim().parse::<u32>().map_err(|e| {
                GatewayError::Config(format!("UNIRANK_LOG_RETENTION: {e}"))
            })?;
            layer.log_retention = Some(n);
        }
        if let Some(s) = get("UNIRANK_QTRACE") {
            layer.qtrace = Some(parse_bool("UNIRANK_QTRACE", &s)?);
        }
        Ok(layer)
    }

    /// # Errors
    /// See [`ConfigLayer::from_vars`].
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|k| std::env::var(k).ok())
    }

    /// Fill every unset setting from `lower`. Sort maps merge per collection.
    pub fn fill_from(&mut self, lower: Self) {
        self.data_dir = self.data_dir.take().or(lower.data_dir);
        self.entity_collection = self.entity_collection.take().or(lower.entity_collection);
        self.review_layout = self.review_layout.take().or(lower.review_layout);
        self.allow_raw_pipelines = self.allow_raw_pipelines.take().or(lower.allow_raw_pipelines);
        self.log_dir = self.log_dir.take().or(lower.log_dir);
        self.log_level = self.log_level.take().or(lower.log_level);
        self.log_retention = self.log_retention.take().or(lower.log_retention);
        self.qtrace = self.qtrace.take().or(lower.qtrace);
        if let Some(theirs) = lower.default_sort {
            let mine = self.default_sort.get_or_insert_with(BTreeMap::new);
            for (k, v) in theirs {
                mine.entry(k).or_insert(v);
            }
        }
    }
}

/// Candidate config files, highest precedence first.
#[must_use]
pub fn config_paths(cli: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(p) = cli {
        paths.push(p.to_path_buf());
    }
    if let Ok(p) = std::env::var("UNIRANK_CONFIG") {
        paths.push(PathBuf::from(p));
    }
    if let Ok(cur) = std::env::current_dir() {
        paths.push(cur.join("unirank.toml"));
    }
    paths
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    pub dir: Option<PathBuf>,
    pub level: Option<String>,
    pub retention: Option<u32>,
    pub qtrace: bool,
}

/// Resolved, validated settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub data_dir: Option<PathBuf>,
    /// Collection listed when a request names none.
    pub entity_collection: String,
    pub review_layout: ReviewLayout,
    pub allow_raw_pipelines: bool,
    pub default_sort: BTreeMap<String, SortSpec>,
    pub log: LogSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let default_sort = EntityKind::ALL
            .into_iter()
            .map(|k| (k.collection().to_string(), k.default_sort()))
            .collect();
        Self {
            data_dir: None,
            entity_collection: UNIVERSITIES.to_string(),
            review_layout: ReviewLayout::default(),
            allow_raw_pipelines: true,
            default_sort,
            log: LogSettings::default(),
        }
    }
}

impl GatewayConfig {
    /// Resolve layers given highest precedence first, then validate.
    ///
    /// # Errors
    /// Returns `Config` for an invalid sort spec or a setting that fails validation.
    pub fn from_layers(layers: impl IntoIterator<Item = ConfigLayer>) -> Result<Self> {
        let mut merged = ConfigLayer::default();
        for layer in layers {
            merged.fill_from(layer);
        }
        let mut cfg = Self::default();
        cfg.data_dir = merged.data_dir.or(cfg.data_dir);
        if let Some(c) = merged.entity_collection {
            cfg.entity_collection = c;
        }
        if let Some(l) = merged.review_layout {
            cfg.review_layout = l;
        }
        if let Some(b) = merged.allow_raw_pipelines {
            cfg.allow_raw_pipelines = b;
        }
        for (collection, spec) in merged.default_sort.unwrap_or_default() {
            let spec = SortSpec::parse(&spec)
                .map_err(|e| GatewayError::Config(format!("default_sort.{collection}: {e}")))?;
            cfg.default_sort.insert(collection, spec);
        }
        cfg.log = LogSettings {
            dir: merged.log_dir,
            level: merged.log_level,
            retention: merged.log_retention,
            qtrace: merged.qtrace.unwrap_or(false),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load with the full precedence chain.
    ///
    /// # Errors
    /// Returns `Config`/`Io` errors from any layer or from validation. A config file passed
    /// explicitly must exist.
    pub fn load(cli: ConfigLayer, cli_config_path: Option<&Path>) -> Result<Self> {
        let mut layers = vec![cli, ConfigLayer::from_env()?];
        if let Some(p) = cli_config_path
            && !p.exists()
        {
            return Err(GatewayError::Config(format!("config file not found: {}", p.display())));
        }
        for path in config_paths(cli_config_path) {
            if path.exists() {
                log::debug!("reading config {}", path.display());
                layers.push(ConfigLayer::from_file(&path)?);
            }
        }
        Self::from_layers(layers)
    }

    #[must_use]
    pub const fn schema(&self) -> Schema {
        Schema::new(self.review_layout)
    }

    /// Configured listing order for `collection`, if any.
    #[must_use]
    pub fn sort_for(&self, collection: &str) -> Option<&SortSpec> {
        self.default_sort.get(collection)
    }

    /// # Errors
    /// Returns `Config` describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        let schema = self.schema();
        schema.validate()?;
        if ![UNIVERSITIES, CITIES].contains(&self.entity_collection.as_str()) {
            return Err(GatewayError::Config(format!(
                "entity_collection must be '{UNIVERSITIES}' or '{CITIES}', got '{}'",
                self.entity_collection
            )));
        }
        for collection in self.default_sort.keys() {
            schema
                .resolve_collection(collection)
                .map_err(|_| GatewayError::Config(format!("default_sort names unknown collection '{collection}'")))?;
        }
        Ok(())
    }
}

//! Configuration file support for tablemirror.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. CLI flags
//! 2. The conventional `AIRTABLE_*` environment variables
//! 3. Environment variables prefixed with `TABLEMIRROR_` (nested keys use `__`,
//!    e.g. `TABLEMIRROR_MEDIA__MAX_DOWNLOADS`)
//! 4. Config file (./tablemirror.toml, then ~/.config/tablemirror/config.toml)
//! 5. Built-in defaults
//!
//! Example config file:
//! ```toml
//! [airtable]
//! token = "pat..."          # or AIRTABLE_API_TOKEN
//! base_id = "appXXXXXXXXXXXXXX"
//! requests_per_second = 5
//!
//! [media]
//! dir = "data/media"
//! link_prefix = "data/media"
//! cache = true
//! prune = true
//! types = "image,pdf"       # empty caches every type
//! max_downloads = 500
//! max_concurrent_downloads = 4
//! max_file_size_bytes = 26214400
//!
//! [sync]
//! mode = "auto"             # or "full"
//!
//! [[datasets]]
//! name = "people"
//! table_id = "tblYYYYYYYYYYYYYY"
//! view_id = "viwYYYYYYYYYYYYYY"
//! output_csv = "data/people.csv"
//! metadata_path = "data/people-metadata.json"
//! preferred_columns = ["Name", "Role"]
//! ```
//!
//! When no `[[datasets]]` are configured a single events timeline dataset is
//! built from `--table-id`, `--view-id`, `--output-csv` and `--metadata-path`.

use std::path::{Path, PathBuf};

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::Deserialize;
use tablemirror::media::{
    DEFAULT_MAX_CONCURRENT_DOWNLOADS, DEFAULT_MEDIA_DIR, DEFAULT_MEDIA_LINK_PREFIX,
    MediaOptions, MediaTypeSelection,
};
use tablemirror::remote::{AIRTABLE_API_URL, rate_limits};
use tablemirror::sync::{DatasetSpec, SyncModeOverride};

use crate::commands::refresh::RefreshArgs;

pub const DEFAULT_BASE_ID: &str = "appyDwtN9iiA9sjEe";
pub const DEFAULT_TABLE_ID: &str = "tblxd8PLtQOl1dRa7";
pub const DEFAULT_VIEW_ID: &str = "viwUWtXt3UUxE6LOC";
pub const DEFAULT_OUTPUT_CSV: &str = "data/events-timeline.csv";
pub const DEFAULT_METADATA_PATH: &str = "data/refresh-metadata.json";
const DEFAULT_DATASET_NAME: &str = "events";

/// Preferred column order of the events timeline.
pub const EVENTS_TIMELINE_COLUMNS: &[&str] = &[
    "Event Name",
    "Beginning Date",
    "Time",
    "Location",
    "Description",
    "Ending Date",
    "Related People & Groups",
    "Sources",
    "Document Images",
    "Events That Followed",
    "Related Documents",
    "Tags",
    "Event Year",
    "Event Month",
    "Weekday",
    "Origin Event",
    "Type",
    "Event Date & Time",
    "Event Timing",
    "Google Search",
    "Image Search",
    "PDFs",
    "Related Vehicles",
    "Created",
    "Time (AM/PM)",
    "Case Theories",
    "End Date/Time",
    "Images",
    "Related Document Summaries",
];

/// Conventional environment variables and the keys they set.
const AIRTABLE_ENV_KEYS: &[(&str, &str)] = &[
    ("AIRTABLE_API_TOKEN", "airtable.token"),
    ("AIRTABLE_BASE_ID", "airtable.base_id"),
    ("AIRTABLE_TABLE_ID", "airtable.table_id"),
    ("AIRTABLE_VIEW_ID", "airtable.view_id"),
    ("AIRTABLE_CACHE_MEDIA_TYPES", "media.types"),
];

/// Errors that stop a run before any network activity.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Missing AIRTABLE_API_TOKEN (or airtable.token in the config file)")]
    MissingToken,

    #[error("Invalid --cache-media-types: {0}")]
    InvalidMediaTypes(#[source] tablemirror::MediaError),

    #[error("Invalid sync mode '{0}', expected 'auto' or 'full'")]
    InvalidSyncMode(String),

    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },

    #[error("Dataset '{name}' is missing {field}")]
    IncompleteDataset { name: String, field: &'static str },

    #[error("No datasets configured")]
    NoDatasets,
}

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote API settings.
    pub airtable: AirtableConfig,
    /// Attachment cache settings.
    pub media: MediaConfig,
    /// Sync strategy settings.
    pub sync: SyncConfig,
    /// Datasets to mirror.
    pub datasets: Vec<DatasetConfig>,
}

/// Remote API settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AirtableConfig {
    pub api_url: String,
    pub token: Option<String>,
    pub base_id: Option<String>,
    /// Table of the default dataset.
    pub table_id: Option<String>,
    /// View of the default dataset.
    pub view_id: Option<String>,
    /// Proactive request pacing; 0 disables it.
    pub requests_per_second: u32,
}

impl Default for AirtableConfig {
    fn default() -> Self {
        Self {
            api_url: AIRTABLE_API_URL.to_string(),
            token: None,
            base_id: None,
            table_id: None,
            view_id: None,
            requests_per_second: rate_limits::AIRTABLE_DEFAULT_RPS,
        }
    }
}

/// Attachment cache settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub dir: PathBuf,
    pub link_prefix: String,
    pub cache: bool,
    pub prune: bool,
    /// Comma-separated classes (`image`, `pdf`, `file`); empty means all.
    pub types: String,
    pub max_downloads: Option<usize>,
    pub max_concurrent_downloads: usize,
    pub max_file_size_bytes: Option<u64>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_MEDIA_DIR),
            link_prefix: DEFAULT_MEDIA_LINK_PREFIX.to_string(),
            cache: true,
            prune: false,
            types: String::new(),
            max_downloads: None,
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            max_file_size_bytes: None,
        }
    }
}

/// Sync strategy settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// `auto` or `full`.
    pub mode: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: "auto".to_string(),
        }
    }
}

/// One configured dataset.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub name: String,
    pub table_id: String,
    pub view_id: String,
    pub output_csv: PathBuf,
    pub metadata_path: PathBuf,
    pub preferred_columns: Vec<String>,
    pub last_modified_fields: Vec<String>,
    pub published_fields: Vec<String>,
}

impl DatasetConfig {
    fn into_spec(self) -> Result<DatasetSpec, ConfigError> {
        let missing = |field| ConfigError::IncompleteDataset {
            name: self.name.clone(),
            field,
        };
        if self.name.trim().is_empty() {
            return Err(missing("name"));
        }
        if self.table_id.trim().is_empty() {
            return Err(missing("table_id"));
        }
        if self.view_id.trim().is_empty() {
            return Err(missing("view_id"));
        }
        if self.output_csv.as_os_str().is_empty() {
            return Err(missing("output_csv"));
        }
        if self.metadata_path.as_os_str().is_empty() {
            return Err(missing("metadata_path"));
        }

        let mut spec = DatasetSpec::new(
            self.name,
            self.table_id,
            self.view_id,
            self.output_csv,
            self.metadata_path,
        )
        .with_preferred_columns(self.preferred_columns);
        if !self.last_modified_fields.is_empty() {
            spec = spec.with_last_modified_candidates(self.last_modified_fields);
        }
        if !self.published_fields.is_empty() {
            spec = spec.with_published_candidates(self.published_fields);
        }
        Ok(spec)
    }
}

/// Everything a refresh needs, validated.
#[derive(Debug)]
pub struct RunSettings {
    pub api_url: String,
    pub token: String,
    pub base_id: String,
    /// `None` disables proactive pacing.
    pub requests_per_second: Option<u32>,
    pub media: MediaOptions,
    pub max_downloads: Option<usize>,
    pub mode: SyncModeOverride,
    pub prune_media: bool,
    pub datasets: Vec<DatasetSpec>,
}

impl Config {
    /// Load configuration using the config crate's layered approach.
    ///
    /// `explicit` replaces the file lookup with a single required file.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        match explicit {
            Some(path) => {
                tracing::debug!("Loading config from {:?}", path);
                builder = builder.add_source(File::from(path).format(FileFormat::Toml));
            }
            None => {
                if let Some(xdg_config) = Self::default_config_path()
                    && xdg_config.exists()
                {
                    tracing::debug!("Loading config from {:?}", xdg_config);
                    builder = builder.add_source(
                        File::from(xdg_config)
                            .format(FileFormat::Toml)
                            .required(false),
                    );
                }

                let local_config = PathBuf::from("tablemirror.toml");
                if local_config.exists() {
                    tracing::debug!("Loading config from ./tablemirror.toml");
                    builder = builder.add_source(
                        File::from(local_config)
                            .format(FileFormat::Toml)
                            .required(false),
                    );
                }
            }
        }

        // e.g. TABLEMIRROR_MEDIA__MAX_DOWNLOADS -> media.max_downloads
        builder = builder.add_source(
            Environment::with_prefix("TABLEMIRROR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        for (key, value) in airtable_env_overrides(|name| std::env::var(name).ok()) {
            builder = builder.set_override_option(key, value)?;
        }

        Ok(builder.build()?.try_deserialize::<Config>()?)
    }

    /// Get the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "tablemirror").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Merge CLI flags over the loaded configuration and validate.
    pub fn resolve(self, args: &RefreshArgs) -> Result<RunSettings, ConfigError> {
        let token = self
            .airtable
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or(ConfigError::MissingToken)?;

        let types = args.cache_media_types.as_deref().unwrap_or(&self.media.types);
        let selection = MediaTypeSelection::parse(types).map_err(ConfigError::InvalidMediaTypes)?;

        let mode_raw = args.sync_mode.as_deref().unwrap_or(&self.sync.mode);
        let mode = mode_raw
            .parse::<SyncModeOverride>()
            .map_err(|_| ConfigError::InvalidSyncMode(mode_raw.to_string()))?;
        let mode = if args.full { SyncModeOverride::Full } else { mode };

        let max_downloads = args.max_downloads.or(self.media.max_downloads);
        if max_downloads == Some(0) {
            return Err(ConfigError::Zero {
                name: "max_downloads",
            });
        }
        let max_concurrent_downloads = args
            .max_concurrent_downloads
            .unwrap_or(self.media.max_concurrent_downloads);
        if max_concurrent_downloads == 0 {
            return Err(ConfigError::Zero {
                name: "max_concurrent_downloads",
            });
        }
        let max_file_size = args.max_file_size_bytes.or(self.media.max_file_size_bytes);
        if max_file_size == Some(0) {
            return Err(ConfigError::Zero {
                name: "max_file_size_bytes",
            });
        }

        let requests_per_second = if args.no_rate_limit {
            None
        } else {
            Some(
                args.requests_per_second
                    .unwrap_or(self.airtable.requests_per_second),
            )
            .filter(|rps| *rps > 0)
        };

        let datasets = if self.datasets.is_empty() {
            vec![default_dataset(&self.airtable, args)]
        } else {
            self.datasets
                .into_iter()
                .map(DatasetConfig::into_spec)
                .collect::<Result<Vec<_>, _>>()?
        };
        if datasets.is_empty() {
            return Err(ConfigError::NoDatasets);
        }

        let media = MediaOptions {
            media_dir: args.media_dir.clone().unwrap_or(self.media.dir),
            link_prefix: args
                .media_link_prefix
                .clone()
                .unwrap_or(self.media.link_prefix),
            enabled: self.media.cache && !args.no_cache_media,
            selection,
            max_file_size,
            max_concurrent_downloads,
            ..MediaOptions::default()
        };

        Ok(RunSettings {
            api_url: args.api_url.clone().unwrap_or(self.airtable.api_url),
            token,
            base_id: args
                .base_id
                .clone()
                .or(self.airtable.base_id)
                .unwrap_or_else(|| DEFAULT_BASE_ID.to_string()),
            requests_per_second,
            media,
            max_downloads,
            mode,
            prune_media: self.media.prune || args.prune_media,
            datasets,
        })
    }
}

/// The single events timeline dataset used when none are configured.
fn default_dataset(airtable: &AirtableConfig, args: &RefreshArgs) -> DatasetSpec {
    let table_id = args
        .table_id
        .clone()
        .or_else(|| airtable.table_id.clone())
        .unwrap_or_else(|| DEFAULT_TABLE_ID.to_string());
    let view_id = args
        .view_id
        .clone()
        .or_else(|| airtable.view_id.clone())
        .unwrap_or_else(|| DEFAULT_VIEW_ID.to_string());

    DatasetSpec::new(
        DEFAULT_DATASET_NAME,
        table_id,
        view_id,
        args.output_csv
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_CSV)),
        args.metadata_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_METADATA_PATH)),
    )
    .with_preferred_columns(EVENTS_TIMELINE_COLUMNS.iter().copied())
}

/// Config keys set from the conventional `AIRTABLE_*` variables.
///
/// Blank values are ignored.
fn airtable_env_overrides(
    lookup: impl Fn(&str) -> Option<String>,
) -> Vec<(&'static str, Option<String>)> {
    AIRTABLE_ENV_KEYS
        .iter()
        .map(|(var, key)| {
            let value = lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
            (*key, value)
        })
        .collect()
}

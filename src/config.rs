use crate::models::rendition::{Destination, RenditionSpec, ResizeOptions};
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, fmt, str::FromStr};
use thiserror::Error;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub pipeline: PipelineConfig,
}

/// Everything the pipeline needs, fixed at start-up and passed in explicitly.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Uploads larger than this are not admitted.
    pub max_source_bytes: u64,

    /// Ordered rendition plan.
    pub renditions: Vec<RenditionSpec>,

    pub failed_source_policy: FailedSourcePolicy,

    /// Chunks each branch may lag behind the source reader.
    pub fanout_buffer_chunks: usize,

    /// Metadata store collection holding one document per upload.
    pub metadata_collection: String,
}

pub const DEFAULT_MAX_SOURCE_BYTES: u64 = 2 * 1024 * 1024;

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
            renditions: default_renditions(
                &RenditionSizes::default(),
                "rendition-resize",
                "rendition-analysis",
                "thumbnail",
                "full",
            ),
            failed_source_policy: FailedSourcePolicy::Delete,
            fanout_buffer_chunks: 8,
            metadata_collection: "uploadFileInfo".into(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_source_bytes == 0 {
            return Err(ConfigError::ZeroMaxSize);
        }
        if self.fanout_buffer_chunks == 0 {
            return Err(ConfigError::ZeroBuffer);
        }
        Ok(())
    }
}

/// What happens to the upload when every rendition failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedSourcePolicy {
    /// Discard it like any other processed upload.
    Delete,
    /// Keep it in place for diagnosis.
    Retain,
}

impl FromStr for FailedSourcePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "delete" => Ok(Self::Delete),
            "retain" => Ok(Self::Retain),
            other => Err(ConfigError::UnknownPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for FailedSourcePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Delete => "delete",
            Self::Retain => "retain",
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no renditions configured")]
    EmptyPlan,
    #[error("rendition `{0}` must have a positive width and height")]
    ZeroDimension(String),
    #[error("rendition `{0}` is configured twice")]
    DuplicateRendition(String),
    #[error("renditions `{first}` and `{second}` write to the same destination")]
    DuplicateDestination { first: String, second: String },
    #[error("unknown failed-source policy `{0}` (expected `delete` or `retain`)")]
    UnknownPolicy(String),
    #[error("maximum source size must be positive")]
    ZeroMaxSize,
    #[error("fan-out buffer must hold at least one chunk")]
    ZeroBuffer,
}

/// Target boxes for the three built-in renditions.
#[derive(Debug, Clone, Copy)]
pub struct RenditionSizes {
    pub thumbnail: (u32, u32),
    pub full: (u32, u32),
    pub analysis: (u32, u32),
}

impl Default for RenditionSizes {
    fn default() -> Self {
        Self {
            thumbnail: (150, 150),
            full: (1200, 630),
            analysis: (640, 480),
        }
    }
}

/// Thumbnail and full-size go to folders of the resize bucket; the analysis
/// copy goes to the root of its own bucket for the external label analyzer.
pub fn default_renditions(
    sizes: &RenditionSizes,
    resize_bucket: &str,
    analysis_bucket: &str,
    thumbnail_folder: &str,
    full_folder: &str,
) -> Vec<RenditionSpec> {
    vec![
        RenditionSpec {
            name: "thumbnail".into(),
            resize: ResizeOptions::cover(sizes.thumbnail.0, sizes.thumbnail.1),
            destination: Destination::new(resize_bucket, thumbnail_folder),
            metadata_flag: Some("thumbnail".into()),
        },
        RenditionSpec {
            name: "full".into(),
            resize: ResizeOptions::cover(sizes.full.0, sizes.full.1),
            destination: Destination::new(resize_bucket, full_folder),
            metadata_flag: Some("resized".into()),
        },
        RenditionSpec {
            name: "analysis".into(),
            resize: ResizeOptions::cover(sizes.analysis.0, sizes.analysis.1),
            destination: Destination::new(analysis_bucket, ""),
            metadata_flag: None,
        },
    ]
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Image rendition fan-out pipeline")]
pub struct Args {
    /// Host to bind to (overrides PIPELINE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PIPELINE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory backing the local object store (overrides PIPELINE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Metadata database URL (overrides PIPELINE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Largest upload admitted, in bytes (overrides MAX_FILE_SIZE_BYTES)
    #[arg(long)]
    pub max_file_size: Option<u64>,

    /// `delete` or `retain` the upload when every rendition failed
    /// (overrides FAILED_SOURCE_POLICY)
    #[arg(long)]
    pub failed_source_policy: Option<FailedSourcePolicy>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::from_sources(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over values from `lookup` over built-in defaults.
    pub fn from_sources(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_host = lookup("PIPELINE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_var(&lookup, "PIPELINE_PORT", 3000u16)?;
        let env_storage =
            lookup("PIPELINE_STORAGE_DIR").unwrap_or_else(|| "./data/objects".into());
        let env_db = lookup("PIPELINE_DATABASE_URL")
            .unwrap_or_else(|| "sqlite://./data/meta/pipeline.db".into());

        let defaults = PipelineConfig::default();
        let default_sizes = RenditionSizes::default();
        let sizes = RenditionSizes {
            thumbnail: (
                parse_var(&lookup, "THUMBNAIL_WIDTH", default_sizes.thumbnail.0)?,
                parse_var(&lookup, "THUMBNAIL_HEIGHT", default_sizes.thumbnail.1)?,
            ),
            full: (
                parse_var(&lookup, "IMAGE_MAX_WIDTH", default_sizes.full.0)?,
                parse_var(&lookup, "IMAGE_MAX_HEIGHT", default_sizes.full.1)?,
            ),
            analysis: (
                parse_var(&lookup, "IMAGE_MAX_WIDTH_ANALYSIS", default_sizes.analysis.0)?,
                parse_var(&lookup, "IMAGE_MAX_HEIGHT_ANALYSIS", default_sizes.analysis.1)?,
            ),
        };
        let resize_bucket = lookup("RESIZE_BUCKET").unwrap_or_else(|| "rendition-resize".into());
        let analysis_bucket =
            lookup("ANALYSIS_BUCKET").unwrap_or_else(|| "rendition-analysis".into());
        let thumbnail_folder = lookup("THUMBNAIL_FOLDER").unwrap_or_else(|| "thumbnail".into());
        let full_folder = lookup("FULL_FOLDER").unwrap_or_else(|| "full".into());

        let env_max = parse_var(&lookup, "MAX_FILE_SIZE_BYTES", defaults.max_source_bytes)?;
        let env_policy = parse_var(
            &lookup,
            "FAILED_SOURCE_POLICY",
            defaults.failed_source_policy,
        )?;

        let pipeline = PipelineConfig {
            max_source_bytes: args.max_file_size.unwrap_or(env_max),
            renditions: default_renditions(
                &sizes,
                &resize_bucket,
                &analysis_bucket,
                &thumbnail_folder,
                &full_folder,
            ),
            failed_source_policy: args.failed_source_policy.unwrap_or(env_policy),
            fanout_buffer_chunks: parse_var(
                &lookup,
                "FANOUT_BUFFER_CHUNKS",
                defaults.fanout_buffer_chunks,
            )?,
            metadata_collection: lookup("METADATA_COLLECTION")
                .unwrap_or(defaults.metadata_collection),
        };
        pipeline.validate().context("validating pipeline configuration")?;

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            pipeline,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        None => Ok(default),
    }
}

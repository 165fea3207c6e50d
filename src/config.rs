//! Configuration management for the `orthanc-stone` command line.
//!
//! This module provides a configuration system that supports:
//! - Command-line arguments via clap
//! - Environment variables with `STONE_` prefix
//! - Defaults for every optional setting
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use orthanc_stone::config::{Cli, Command};
//!
//! match Cli::parse().command {
//!     Command::Volume(config) => println!("Loading series {}", config.series),
//!     Command::Frame(config) => println!("Loading instance {}", config.instance),
//!     Command::Check(config) => println!("Checking {}", config.orthanc.url),
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `STONE_ORTHANC_URL` - Root of the Orthanc REST API (default: http://localhost:8042)
//! - `STONE_USERNAME` / `STONE_PASSWORD` - HTTP basic credentials
//! - `STONE_TIMEOUT_SECS` - Per-request timeout (default: 30)
//! - `STONE_SERIES` - Series to load with `volume`
//! - `STONE_MAX_CONCURRENT_DOWNLOADS` - Parallel slice downloads (default: 4)
//! - `STONE_SPACING_TOLERANCE` - Accepted spacing deviation in mm (default: 0.001)
//! - `STONE_INSTANCE` - Instance to load with `frame`
//! - `STONE_CACHE_CAPACITY` - Cached frames (default: 256)

use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::loader::SliceImageQuality;
use crate::smart_loader::{SmartLoaderOptions, DEFAULT_CACHE_CAPACITY};
use crate::volume::VolumeImageOptions;

// =============================================================================
// Default Values
// =============================================================================

/// Default Orthanc server.
pub const DEFAULT_ORTHANC_URL: &str = "http://localhost:8042";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default number of slice downloads in flight.
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 4;

/// Upper bound on slice downloads in flight.
pub const MAX_CONCURRENT_DOWNLOADS: usize = 64;

/// Default accepted deviation of the inter-slice spacing, in mm.
pub const DEFAULT_SPACING_TOLERANCE: f64 = 0.001;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Orthanc Stone - loads DICOM slices and volumes from an Orthanc server.
#[derive(Parser, Debug, Clone)]
#[command(name = "orthanc-stone")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Load a series into a 3D volume and report its projections.
    Volume(VolumeConfig),

    /// Load one frame into a viewer through the frame cache.
    Frame(FrameConfig),

    /// Check that the Orthanc server answers.
    Check(CheckConfig),
}

impl Command {
    /// Server settings shared by every command.
    pub fn orthanc(&self) -> &OrthancConfig {
        match self {
            Command::Volume(config) => &config.orthanc,
            Command::Frame(config) => &config.orthanc,
            Command::Check(config) => &config.orthanc,
        }
    }
}

// =============================================================================
// Orthanc Server
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct OrthancConfig {
    /// Root of the Orthanc REST API.
    #[arg(long = "orthanc-url", default_value = DEFAULT_ORTHANC_URL, env = "STONE_ORTHANC_URL")]
    pub url: String,

    /// Username for HTTP basic authentication.
    #[arg(long, env = "STONE_USERNAME")]
    pub username: Option<String>,

    /// Password for HTTP basic authentication.
    #[arg(long, env = "STONE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Timeout of each request, in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, env = "STONE_TIMEOUT_SECS")]
    pub timeout_secs: u64,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl OrthancConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("Orthanc URL is required. Set --orthanc-url or STONE_ORTHANC_URL".to_string());
        }

        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(format!("Orthanc URL must be http(s), got {}", self.url));
        }

        if self.password.is_some() && self.username.is_none() {
            return Err("A password was given without a username".to_string());
        }

        if self.timeout_secs == 0 {
            return Err("timeout_secs must be greater than 0".to_string());
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// =============================================================================
// Volume Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct VolumeConfig {
    #[command(flatten)]
    pub orthanc: OrthancConfig,

    /// Orthanc identifier of the series.
    #[arg(long, env = "STONE_SERIES")]
    pub series: String,

    /// Encoding of the slice downloads.
    #[arg(long, value_enum, default_value_t = SliceImageQuality::Jpeg90)]
    pub quality: SliceImageQuality,

    /// Number of slice downloads in flight.
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_CONCURRENT_DOWNLOADS,
        env = "STONE_MAX_CONCURRENT_DOWNLOADS"
    )]
    pub max_concurrent_downloads: usize,

    /// Accepted deviation of the inter-slice spacing, in mm.
    #[arg(long, default_value_t = DEFAULT_SPACING_TOLERANCE, env = "STONE_SPACING_TOLERANCE")]
    pub spacing_tolerance: f64,
}

impl VolumeConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.orthanc.validate()?;

        if self.series.is_empty() {
            return Err("Series identifier is required. Set --series or STONE_SERIES".to_string());
        }

        if !(1..=MAX_CONCURRENT_DOWNLOADS).contains(&self.max_concurrent_downloads) {
            return Err(format!(
                "max_concurrent_downloads must be between 1 and {}",
                MAX_CONCURRENT_DOWNLOADS
            ));
        }

        if self.spacing_tolerance.is_nan() || self.spacing_tolerance <= 0.0 {
            return Err("spacing_tolerance must be greater than 0".to_string());
        }

        Ok(())
    }

    pub fn volume_options(&self) -> VolumeImageOptions {
        VolumeImageOptions {
            max_concurrent_downloads: self.max_concurrent_downloads,
            spacing_tolerance: self.spacing_tolerance,
            quality: self.quality,
        }
    }
}

// =============================================================================
// Frame Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct FrameConfig {
    #[command(flatten)]
    pub orthanc: OrthancConfig,

    /// Orthanc identifier of the instance.
    #[arg(long, env = "STONE_INSTANCE")]
    pub instance: String,

    /// Frame of the instance, starting at 0.
    #[arg(long, default_value_t = 0)]
    pub frame: u32,

    /// Encoding of the frame download.
    #[arg(long, value_enum, default_value_t = SliceImageQuality::FullPam)]
    pub quality: SliceImageQuality,

    /// Maximum number of cached frames.
    #[arg(long, default_value_t = DEFAULT_CACHE_CAPACITY, env = "STONE_CACHE_CAPACITY")]
    pub cache_capacity: usize,
}

impl FrameConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.orthanc.validate()?;

        if self.instance.is_empty() {
            return Err(
                "Instance identifier is required. Set --instance or STONE_INSTANCE".to_string(),
            );
        }

        if self.cache_capacity == 0 {
            return Err("cache_capacity must be greater than 0".to_string());
        }

        Ok(())
    }

    pub fn smart_loader_options(&self) -> SmartLoaderOptions {
        SmartLoaderOptions {
            cache_capacity: self.cache_capacity,
            quality: self.quality,
        }
    }
}

// =============================================================================
// Check Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct CheckConfig {
    #[command(flatten)]
    pub orthanc: OrthancConfig,
}

impl CheckConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.orthanc.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================

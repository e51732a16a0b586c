//! Configuration module for Pricewatch
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use pricewatch::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("shop.toml")).unwrap();
//! println!("Crawler will run {} workers", config.crawler.max_concurrency);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    BackoffKind, ChallengeConfig, Config, CrawlMode, CrawlerConfig, OutputConfig,
    PostProcessingConfig, ProxyConfig, SeedConfig, SessionConfig, SiteConfig,
};

pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use validation::validate;

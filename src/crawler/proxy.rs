//! Proxy endpoints handed to new sessions

use crate::config::ProxyConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Errors raised when no proxy can be obtained
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Unknown proxy pool: {0}")]
    UnknownPool(String),

    #[error("Proxy pool '{0}' is empty")]
    EmptyPool(String),
}

/// Where a session's traffic goes out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    /// Proxy URL; `None` connects directly
    pub url: Option<String>,
    pub pool: String,
}

impl ProxyEndpoint {
    pub fn direct() -> Self {
        Self {
            url: None,
            pool: DIRECT_POOL.to_string(),
        }
    }
}

/// Pool name used when no proxy pools are configured
pub const DIRECT_POOL: &str = "direct";

/// Source of proxy endpoints
pub trait ProxyProvider: Send + Sync {
    fn next(&self, pool_name: &str) -> Result<ProxyEndpoint, ProxyError>;
}

/// No proxy at all
#[derive(Debug, Default)]
pub struct DirectProvider;

impl ProxyProvider for DirectProvider {
    fn next(&self, _pool_name: &str) -> Result<ProxyEndpoint, ProxyError> {
        Ok(ProxyEndpoint::direct())
    }
}

/// Round-robin over fixed lists of proxy URLs, one cursor per pool
#[derive(Debug)]
pub struct StaticProxyProvider {
    pools: HashMap<String, (Vec<String>, AtomicUsize)>,
}

impl StaticProxyProvider {
    pub fn new(pools: HashMap<String, Vec<String>>) -> Self {
        Self {
            pools: pools
                .into_iter()
                .map(|(name, urls)| (name, (urls, AtomicUsize::new(0))))
                .collect(),
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(config.pools.clone())
    }
}

impl ProxyProvider for StaticProxyProvider {
    fn next(&self, pool_name: &str) -> Result<ProxyEndpoint, ProxyError> {
        let (urls, cursor) = self
            .pools
            .get(pool_name)
            .ok_or_else(|| ProxyError::UnknownPool(pool_name.to_string()))?;

        if urls.is_empty() {
            return Err(ProxyError::EmptyPool(pool_name.to_string()));
        }

        let index = cursor.fetch_add(1, Ordering::Relaxed) % urls.len();
        Ok(ProxyEndpoint {
            url: Some(urls[index].clone()),
            pool: pool_name.to_string(),
        })
    }
}

use std::fmt;
use std::time::Duration;

use crate::config::{CacheItemConfig, Config};

/// All known cache names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheName {
    Orders,
    Trades,
}

impl AsRef<str> for CacheName {
    fn as_ref(&self) -> &str {
        match self {
            Self::Orders => "orders",
            Self::Trades => "trades",
        }
    }
}

impl fmt::Display for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Runtime handle carrying one cache's name and tuning knobs.
#[derive(Debug, Clone)]
pub struct Cache {
    name: CacheName,
    default_max_age: Duration,
    capacity: u64,
}

impl Cache {
    pub fn from_config(name: CacheName, config: &Config) -> Self {
        let item: &CacheItemConfig = match name {
            CacheName::Orders => &config.caches.orders,
            CacheName::Trades => &config.caches.trades,
        };
        Cache {
            name,
            default_max_age: item.max_age,
            capacity: item.capacity,
        }
    }

    pub fn name(&self) -> CacheName {
        self.name
    }

    /// Freshness window used when the caller does not supply one.
    pub fn default_max_age(&self) -> Duration {
        self.default_max_age
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[cfg(test)]
    pub fn for_testing(name: CacheName, default_max_age: Duration) -> Self {
        Cache {
            name,
            default_max_age,
            capacity: 1024,
        }
    }
}

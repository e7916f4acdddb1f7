//! Readiness probe over the shared backends.
//!
//! The probe pings each backend independently and reports every result, so
//! an operator can see which dependency is down rather than only that one
//! is.

use std::sync::Arc;

use log::warn;
use serde::Serialize;

use crate::{catalog::CatalogStore, kv::KvStore, object_store::ObjectStore};

/// State of one dependency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "lowercase")]
pub enum ComponentHealth {
    /// The dependency answered.
    Up,
    /// The dependency failed with the given message.
    Down(String),
}

impl ComponentHealth {
    fn from_result<E: std::fmt::Display>(component: &str, result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::Up,
            Err(e) => {
                warn!("health check failed: component={component}, error={e}");
                Self::Down(e.to_string())
            }
        }
    }

    /// Whether the dependency answered.
    #[must_use]
    pub const fn is_up(&self) -> bool { matches!(self, Self::Up) }
}

/// Result of one probe.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Shared key-value store.
    pub kv: ComponentHealth,
    /// Object store.
    pub object_store: ComponentHealth,
    /// Catalog database.
    pub catalog: ComponentHealth,
}

impl HealthReport {
    /// Whether every dependency answered.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.kv.is_up() && self.object_store.is_up() && self.catalog.is_up()
    }
}

/// Pings the backends the pipeline depends on.
#[derive(Clone)]
pub struct HealthProbe {
    kv: Arc<dyn KvStore>,
    objects: Arc<dyn ObjectStore>,
    catalog: Arc<dyn CatalogStore>,
}

impl std::fmt::Debug for HealthProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthProbe").finish_non_exhaustive()
    }
}

impl HealthProbe {
    /// Create a probe over the given clients.
    #[must_use]
    pub fn new(
        kv: Arc<dyn KvStore>,
        objects: Arc<dyn ObjectStore>,
        catalog: Arc<dyn CatalogStore>,
    ) -> Self {
        Self {
            kv,
            objects,
            catalog,
        }
    }

    /// The process is alive; always true once the probe exists.
    #[must_use]
    pub const fn live(&self) -> bool { true }

    /// Ping every backend concurrently.
    pub async fn ready(&self) -> HealthReport {
        let (kv, objects, catalog) =
            tokio::join!(self.kv.ping(), self.objects.ping(), self.catalog.ping());
        HealthReport {
            kv: ComponentHealth::from_result("kv", kv),
            object_store: ComponentHealth::from_result("object_store", objects),
            catalog: ComponentHealth::from_result("catalog", catalog),
        }
    }
}

//! Aggregated service statistics for `GET /stats` and `mailseek stats`.

use serde::Serialize;

use crate::error::Result;
use crate::index::VectorIndex;
use crate::registry::ConnectorRegistry;

#[derive(Debug, Clone, Serialize)]
pub struct VectorDatabaseStats {
    pub total_emails: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectorStats {
    pub total_connectors: u64,
    /// Connectors currently in the `connected` state. Syncing, errored,
    /// and disconnected connectors are not counted.
    pub connected_connectors: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub vector_database: VectorDatabaseStats,
    pub connectors: ConnectorStats,
}

pub async fn gather(
    registry: &ConnectorRegistry,
    index: &VectorIndex,
) -> Result<StatsReport> {
    let (total_connectors, connected_connectors) = registry.connector_counts();
    let total_emails = index.count().await?;

    Ok(StatsReport {
        vector_database: VectorDatabaseStats { total_emails },
        connectors: ConnectorStats {
            total_connectors,
            connected_connectors,
        },
    })
}

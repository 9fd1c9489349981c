//! Agent directory queries
//!
//! Agents are managed outside the service; the only write here is the
//! startup seed from configuration.

use cuentakm_common::db::Agent;
use cuentakm_common::Result;
use sqlx::SqlitePool;
use tracing::info;

/// All agents, sorted by name
pub async fn list_agents(pool: &SqlitePool) -> Result<Vec<Agent>> {
    let agents = sqlx::query_as::<_, Agent>("SELECT id, name FROM agents ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(agents)
}

/// Look up one agent
pub async fn get_agent(pool: &SqlitePool, agent_id: i64) -> Result<Option<Agent>> {
    let agent = sqlx::query_as::<_, Agent>("SELECT id, name FROM agents WHERE id = ?")
        .bind(agent_id)
        .fetch_optional(pool)
        .await?;
    Ok(agent)
}

/// Insert any configured agent names not yet present
///
/// Returns how many rows were added.
pub async fn seed_agents(pool: &SqlitePool, names: &[String]) -> Result<u64> {
    let mut added = 0;
    for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        let result = sqlx::query("INSERT OR IGNORE INTO agents (name) VALUES (?)")
            .bind(name)
            .execute(pool)
            .await?;
        added += result.rows_affected();
    }
    if added > 0 {
        info!(added, "Seeded agents from configuration");
    }
    Ok(added)
}

use mongodb::{Database, bson::doc};
use std::time::{Duration, Instant};

/// Result of a ping against the configured database
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    /// Error details when unhealthy
    pub message: Option<String>,
    pub response_time: Duration,
}

/// Run `{ ping: 1 }` against the database and report latency.
///
/// ```ignore
/// let status = check_health(&db).await;
/// if !status.healthy {
///     tracing::warn!(error = ?status.message, "MongoDB unhealthy");
/// }
/// ```
pub async fn check_health(db: &Database) -> HealthStatus {
    let start = Instant::now();

    match db.run_command(doc! { "ping": 1 }).await {
        Ok(_) => HealthStatus {
            healthy: true,
            message: None,
            response_time: start.elapsed(),
        },
        Err(e) => HealthStatus {
            healthy: false,
            message: Some(e.to_string()),
            response_time: start.elapsed(),
        },
    }
}

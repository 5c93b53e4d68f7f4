use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::{Engine, EngineError};
use crate::observability;

/// Compact the WAL if at least `threshold` appends happened since the last
/// compaction. Returns whether it ran.
pub async fn maybe_compact(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    debug!(appends, threshold, "compaction threshold reached");
    engine.compact_wal().await?;
    metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
    Ok(true)
}

/// Background task that periodically checks whether the WAL needs compacting.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if let Err(e) = maybe_compact(&engine, threshold).await {
            warn!("WAL compaction failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotmarket_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path.clone()).unwrap();
        let service = engine
            .create_provider_service(Ulid::new(), Ulid::new(), 2_500, String::new())
            .await
            .unwrap();
        for rate in 0..4 {
            engine
                .update_provider_service(service.id, Some(rate), None)
                .await
                .unwrap();
        }

        assert!(!maybe_compact(&engine, 10).await.unwrap());
        assert_eq!(engine.wal_appends_since_compact().await, 5);

        assert!(maybe_compact(&engine, 5).await.unwrap());
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        drop(engine);
        let restored = Engine::new(path).unwrap();
        let got = restored.get_provider_service(&service.id).await.unwrap();
        assert_eq!(got.hourly_rate_cents, 3);
    }
}

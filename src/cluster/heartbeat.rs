//! Heartbeat loops
//!
//! A master polls its agents; a candidate polls the master and triggers a
//! re-election when it stops answering.

use std::sync::Arc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::driver::Driver;
use crate::http::RetryPolicy;

fn ticker(period: std::time::Duration) -> tokio::time::Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Candidate side: keep a fresh copy of the master's progress
pub async fn watch_master(driver: Arc<Driver>, stop: CancellationToken) {
    let mut ticker = ticker(driver.cluster().heartbeat_interval());

    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let Some(master) = driver.state().master_id() else {
            continue;
        };
        if master == driver.id() {
            return;
        }

        let url = driver.cluster().driver_url(master);
        match driver.client().heartbeat(&url).await {
            Ok(progress) => {
                debug!("Master {} at phase {:?}", master, progress.phase);
                driver.state().work().adopt(&progress);
            }
            Err(e) => {
                if stop.is_cancelled() {
                    return;
                }
                warn!("Heartbeat to master {} failed: {}", master, e);
                driver.reelect(master).await;
                return;
            }
        }
    }
}

/// Master side: count missed answers per agent and drop the silent ones
pub async fn heartbeat_agents(driver: Arc<Driver>, stop: CancellationToken) {
    let mut ticker = ticker(driver.cluster().heartbeat_interval());
    let client = driver.client().with_retry(RetryPolicy::once());
    let threshold = driver.cluster().agent_heartbeat_misses.max(1);

    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = ticker.tick() => {}
        }

        for agent in driver.state().agents() {
            match client.agent_status(&agent).await {
                Ok(status) => driver.state().agent_alive(&agent, status),
                Err(e) => {
                    let misses = driver.state().agent_missed(&agent);
                    warn!(
                        "Agent {} missed heartbeat {}/{}: {}",
                        agent, misses, threshold, e
                    );
                    if misses >= threshold {
                        driver.agent_lost(&agent).await;
                    }
                }
            }
        }
    }
}

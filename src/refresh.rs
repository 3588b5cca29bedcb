//! # Proactive Token Refresh
//!
//! Background task that periodically scans active integrations and
//! refreshes tokens inside the expiry lead window, instead of waiting for a
//! provider call to fail. Terminal outcomes (revoked refresh tokens) are
//! decided inside the manager; this sweep only drives and counts.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use rand::Rng;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use tokio::time::{Duration as TokioDuration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::config::TokenRefreshConfig;
use crate::manager::{OAuthError, OAuthManager};
use crate::models::integration::IntegrationStatus;
use crate::models::{integration, token_record};
use crate::repositories::StateStore;

/// Background refresh sweep over integrations nearing token expiry
pub struct RefreshService {
    config: TokenRefreshConfig,
    db: Arc<DatabaseConnection>,
    manager: Arc<OAuthManager>,
    states: StateStore,
}

#[derive(Debug, Default)]
struct SweepStats {
    due: u64,
    succeeded: u64,
    failed: u64,
}

impl RefreshService {
    pub fn new(
        config: TokenRefreshConfig,
        db: Arc<DatabaseConnection>,
        manager: Arc<OAuthManager>,
    ) -> Self {
        Self {
            config,
            states: StateStore::new(db.clone()),
            db,
            manager,
        }
    }

    /// Run the sweep loop until the shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            tick_seconds = self.config.tick_seconds,
            lead_time_seconds = self.config.lead_time_seconds,
            "starting token refresh sweep"
        );
        let tick_interval = TokioDuration::from_secs(self.config.tick_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("token refresh sweep shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = std::time::Instant::now();
                    if let Err(err) = self.tick().await {
                        error!(error = ?err, "token refresh tick failed");
                    }
                    histogram!("token_refresh_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("token refresh sweep stopped");
    }

    /// Execute one sweep: find due integrations and refresh them under the
    /// configured concurrency limit.
    #[instrument(skip_all)]
    pub async fn tick(&self) -> Result<(), sea_orm::DbErr> {
        // Expired nonces are rejected at consume time regardless; this only
        // keeps the table from growing
        let swept = self.states.cleanup_expired().await?;
        if swept > 0 {
            debug!(swept, "removed expired authorization states");
        }

        let now = Utc::now();
        let due = self.find_due_integrations(now).await?;

        let mut stats = SweepStats {
            due: due.len() as u64,
            ..Default::default()
        };

        if due.is_empty() {
            debug!("no integrations due for refresh");
            return Ok(());
        }

        info!(due = stats.due, "found integrations due for token refresh");

        let semaphore = Arc::new(tokio::sync::Semaphore::new(
            self.config.concurrency as usize,
        ));
        let mut handles = Vec::with_capacity(due.len());

        for integration_id in due {
            let semaphore = semaphore.clone();
            let manager = self.manager.clone();
            let jitter = self.compute_jitter();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                if jitter > 0 {
                    sleep(TokioDuration::from_millis(jitter)).await;
                }
                manager.refresh(integration_id, "system").await
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(Ok(_)) => stats.succeeded += 1,
                Ok(Err(err)) => {
                    stats.failed += 1;
                    match &err {
                        // Terminal flip already happened inside the manager
                        OAuthError::ProviderRejected { code } => {
                            debug!(provider_error = %code, "integration expired during sweep");
                        }
                        other => error!(error = %other, "sweep refresh failed"),
                    }
                }
                Err(join_err) => {
                    stats.failed += 1;
                    error!(error = ?join_err, "refresh task panicked or was cancelled");
                }
            }
        }

        counter!("token_refresh_attempts_total").increment(stats.due);
        counter!("token_refresh_success_total").increment(stats.succeeded);
        counter!("token_refresh_failure_total").increment(stats.failed);

        debug!(
            due = stats.due,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "token refresh tick completed"
        );

        Ok(())
    }

    /// Active integrations holding a refresh token whose access token
    /// expires within the lead window.
    async fn find_due_integrations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, sea_orm::DbErr> {
        let cutoff: DateTimeWithTimeZone =
            (now + Duration::seconds(self.config.lead_time_seconds as i64)).into();

        let rows = token_record::Entity::find()
            .find_also_related(integration::Entity)
            .filter(token_record::Column::ExpiresAt.is_not_null())
            .filter(token_record::Column::ExpiresAt.lte(cutoff))
            .filter(token_record::Column::RefreshTokenCiphertext.is_not_null())
            .filter(integration::Column::Status.eq(IntegrationStatus::Active.as_str()))
            .order_by_asc(token_record::Column::ExpiresAt)
            .all(self.db.as_ref())
            .await?;

        Ok(rows
            .into_iter()
            .map(|(record, _)| record.integration_id)
            .collect())
    }

    /// Millisecond jitter bounded by the configured factor of the tick
    /// interval, to spread provider calls across the fleet.
    fn compute_jitter(&self) -> u64 {
        if self.config.jitter_factor <= 0.0 {
            return 0;
        }

        let max_delay_ms =
            (self.config.tick_seconds as f64 * 1_000.0 * self.config.jitter_factor) as u64;
        if max_delay_ms == 0 {
            return 0;
        }

        rand::thread_rng().gen_range(0..=max_delay_ms)
    }
}

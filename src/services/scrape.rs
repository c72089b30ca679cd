//! Scrape orchestration: guard, login, fetch, persist, publish.
//!
//! One run produces at most one persisted record. A run that cannot even
//! start (no configuration or unusable credentials) writes nothing at all;
//! a run that starts always records its outcome, success or error.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::events::{Event, EventBus};
use crate::models::{ScrapeEnvelope, ScrapeStatus};
use crate::repository::{Result, ScrapeConfigRepository, ScrapeDataRepository};
use crate::scrapers::{AlertsFetch, DataFetcher, LoginFlow, LoginOutcome, SessionClient};
use crate::vault::Vault;

/// How a scrape run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Preconditions not met; nothing was written.
    Skipped,
    /// A record was persisted with the given status.
    Completed(ScrapeStatus),
}

/// Orchestrates one scrape run end to end.
pub struct ScrapeService {
    config_repo: ScrapeConfigRepository,
    data_repo: ScrapeDataRepository,
    vault: Vault,
    events: EventBus,
}

impl ScrapeService {
    pub fn new(
        config_repo: ScrapeConfigRepository,
        data_repo: ScrapeDataRepository,
        vault: Vault,
        events: EventBus,
    ) -> Self {
        Self {
            config_repo,
            data_repo,
            vault,
            events,
        }
    }

    /// Run a full scrape of the open-alerts dataset.
    pub async fn run(&self) -> Result<RunOutcome> {
        let session = SessionClient::new();
        // The fetcher shares the session's cookie jar.
        let fetcher = DataFetcher::new(session.http().clone());
        self.run_with(&session, &fetcher).await
    }

    /// Run a scrape of the gear list instead of the alerts dataset.
    pub async fn run_gear(&self) -> Result<RunOutcome> {
        let session = SessionClient::new();
        let fetcher = GearFetcher(DataFetcher::new(session.http().clone()));
        self.run_with(&session, &fetcher).await
    }

    /// Run with injectable login and fetch collaborators.
    pub async fn run_with(
        &self,
        login: &dyn LoginFlow,
        fetch: &dyn AlertsFetch,
    ) -> Result<RunOutcome> {
        let Some(config) = self.config_repo.get()? else {
            info!("scrape skipped: no configuration");
            return Ok(RunOutcome::Skipped);
        };

        let Some(username) = config
            .username
            .as_deref()
            .filter(|username| !username.is_empty())
        else {
            info!("scrape skipped: no username configured");
            return Ok(RunOutcome::Skipped);
        };

        let Some(encrypted) = config.password_encrypted.as_deref() else {
            info!("scrape skipped: no password configured");
            return Ok(RunOutcome::Skipped);
        };

        let password = match self.vault.decrypt(encrypted) {
            Ok(password) => password,
            Err(e) => {
                warn!(error = %e, "scrape skipped: stored password cannot be decrypted");
                return Ok(RunOutcome::Skipped);
            }
        };

        let base_url = config.effective_base_url();
        info!(base_url = %base_url, "starting scrape run");

        let envelope = match login.login(username, &password, &base_url).await {
            LoginOutcome::Success {
                alerts_link,
                redirect_url,
                confident,
            } => {
                if !confident {
                    warn!(url = %redirect_url, "proceeding on tentative login");
                }
                fetch.fetch_alerts(&base_url, alerts_link.as_deref()).await
            }
            LoginOutcome::Failure(failure) => {
                let url = failure
                    .url
                    .clone()
                    .unwrap_or_else(|| format!("{base_url}/login"));
                let mut envelope = ScrapeEnvelope::error(
                    url,
                    format!("login failed at {}: {}", failure.step.as_str(), failure.message),
                );
                if let Some(code) = failure.status_code {
                    envelope = envelope.with_status_code(code);
                }
                if let Some(body_preview) = &failure.response_preview {
                    envelope = envelope.with_preview(body_preview.clone());
                }
                envelope.with_details(serde_json::to_value(&failure)?)
            }
        };

        let status = envelope.status;
        self.data_repo.append_run(&envelope, Utc::now())?;
        self.events
            .publish(Event::ScrapeUpdate(serde_json::to_value(&envelope)?));

        info!(status = status.as_str(), "scrape run recorded");
        Ok(RunOutcome::Completed(status))
    }
}

/// Adapter that routes the orchestration's fetch step to the gear list.
struct GearFetcher(DataFetcher);

#[async_trait]
impl AlertsFetch for GearFetcher {
    async fn fetch_alerts(&self, base_url: &str, _target_url: Option<&str>) -> ScrapeEnvelope {
        self.0.fetch_gear_list(base_url).await
    }
}

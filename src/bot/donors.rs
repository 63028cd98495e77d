// src/bot/donors.rs - Donor roster fetched from Extra Life and refreshed periodically

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::time::{interval, Duration, MissedTickBehavior};
use url::Url;

use super::identity::normalize_all;
use super::moderation::ModerationEngine;
use super::shutdown::ShutdownSignal;
use crate::types::UserKey;

const EXTRA_LIFE_API: &str = "https://extra-life.donordrive.com/api";
const ANONYMOUS: &str = "ANONYMOUS";

/// A single donation with a sanitized donor name
#[derive(Debug, Clone, PartialEq)]
pub struct Donation {
    pub display_name: String,
    pub amount: f64,
}

impl Donation {
    pub fn is_anonymous(&self) -> bool {
        self.display_name == ANONYMOUS
    }

    /// Line written to the roster file
    pub fn roster_line(&self) -> String {
        format!("{} ${:.2}", self.display_name, self.amount)
    }
}

#[derive(Debug, Deserialize)]
struct DonationRecord {
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    amount: Option<f64>,
}

/// Remove colons and spaces, keeping capitalization
pub fn sanitize_name(name: &str) -> String {
    name.chars().filter(|c| *c != ':' && *c != ' ').collect()
}

/// Parse one page of the donations endpoint
pub fn parse_donations(body: &str) -> Result<Vec<Donation>> {
    let records: Vec<DonationRecord> = serde_json::from_str(body).context("Invalid donations JSON")?;
    Ok(records
        .into_iter()
        .map(|record| Donation {
            display_name: sanitize_name(record.display_name.as_deref().unwrap_or(ANONYMOUS)),
            amount: record.amount.unwrap_or(0.0),
        })
        .collect())
}

/// Normalized keys of every named donor
pub fn donor_keys(donations: &[Donation]) -> HashSet<UserKey> {
    normalize_all(
        donations
            .iter()
            .filter(|donation| !donation.is_anonymous())
            .map(|donation| donation.display_name.as_str()),
    )
}

fn total_pages(num_records: u64, page_size: u32) -> u64 {
    let page_size = u64::from(page_size.max(1));
    (num_records + page_size - 1) / page_size
}

/// Source of the current donor roster
#[async_trait]
pub trait DonorSource: Send + Sync {
    async fn fetch_roster(&self) -> Result<Vec<Donation>>;
}

/// DonorDrive client for one Extra Life participant
pub struct ExtraLifeClient {
    client: reqwest::Client,
    base_url: String,
    participant_id: String,
    page_size: u32,
}

impl ExtraLifeClient {
    pub fn new(participant_id: &str, page_size: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: EXTRA_LIFE_API.to_string(),
            participant_id: participant_id.to_string(),
            page_size: page_size.max(1),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn page_url(&self, page: u64) -> Result<Url> {
        let endpoint = format!("{}/participants/{}/donations", self.base_url, self.participant_id);
        Url::parse_with_params(
            &endpoint,
            &[("limit", self.page_size.to_string()), ("page", page.to_string())],
        )
        .with_context(|| format!("Invalid donations URL: {}", endpoint))
    }
}

#[async_trait]
impl DonorSource for ExtraLifeClient {
    async fn fetch_roster(&self) -> Result<Vec<Donation>> {
        let mut donations = Vec::new();
        let mut page = 1;

        loop {
            let url = self.page_url(page)?;
            let response = self
                .client
                .get(url)
                .send()
                .await
                .context("Donations request failed")?;

            if !response.status().is_success() {
                bail!("Error fetching donations (status {})", response.status());
            }

            let num_records = response
                .headers()
                .get("num-records")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(0);

            let body = response.text().await?;
            let batch = parse_donations(&body)?;
            debug!("Donations page {}: {} records ({} total)", page, batch.len(), num_records);
            donations.extend(batch);

            if page >= total_pages(num_records, self.page_size) {
                break;
            }
            page += 1;
        }

        Ok(donations)
    }
}

/// Keeps the engine's donor set in step with the donor source
pub struct DonorRefresher {
    source: Arc<dyn DonorSource>,
    engine: ModerationEngine,
    roster_path: Option<PathBuf>,
}

impl DonorRefresher {
    pub fn new(source: Arc<dyn DonorSource>, engine: ModerationEngine) -> Self {
        Self {
            source,
            engine,
            roster_path: None,
        }
    }

    pub fn with_roster_file(mut self, path: PathBuf) -> Self {
        self.roster_path = Some(path);
        self
    }

    /// Fetch once and swap the result in. On a fetch failure the engine keeps
    /// its previous roster. A roster file that cannot be written is only logged.
    pub async fn refresh_once(&self) -> Result<usize> {
        let donations = self.source.fetch_roster().await?;
        let donors = donor_keys(&donations);
        let count = donors.len();

        self.engine.replace_donors(donors).await;

        if let Some(path) = &self.roster_path {
            let mut content = String::new();
            for donation in &donations {
                content.push_str(&donation.roster_line());
                content.push('\n');
            }
            if let Err(e) = fs::write(path, content).await {
                warn!("Failed to write donor roster {}: {}", path.display(), e);
            }
        }

        info!("Fetched {} donations from {} donors", donations.len(), count);
        Ok(count)
    }

    pub async fn run(self, refresh_interval: Duration, shutdown: ShutdownSignal) {
        let mut ticker = interval(refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_receiver = shutdown.subscribe();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if shutdown.is_requested() {
                        break;
                    }
                    if let Err(e) = self.refresh_once().await {
                        error!("Donor roster refresh failed, keeping previous roster: {:#}", e);
                    }
                }
                _ = shutdown_receiver.recv() => break,
            }
        }

        info!("Donor refresh loop stopped");
    }
}

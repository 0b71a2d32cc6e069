//! The provider registry and its adaptive selector.

use crate::manifest::ProviderManifest;
use crate::window::RequestWindow;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tessera_core::{EngineError, ProviderId};
use tokio::time::Instant;

const RELIABILITY_WEIGHT: f64 = 40.0;
const COST_WEIGHT: f64 = 20.0;
const SUCCESS_WEIGHT: f64 = 20.0;
const AVAILABILITY_BONUS: f64 = 10.0;
const RECENCY_CAP: f64 = 10.0;
const UNSEEN_SUCCESS_RATE: f64 = 0.5;

/// Selector tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectorConfig {
    /// Cost (USD per call) at or above which the cost score is zero.
    pub cost_ceiling: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self { cost_ceiling: 1.0 }
    }
}

/// Hard filters applied before scoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Requirements {
    /// Skip providers costing more than this per call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<f64>,
    /// Skip providers whose reliability prior is below this.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_reliability: Option<f64>,
}

impl Requirements {
    fn admits(&self, manifest: &ProviderManifest) -> bool {
        let cost = manifest.cost.to_f64().unwrap_or(f64::MAX);
        self.max_cost.is_none_or(|max| cost <= max)
            && self
                .min_reliability
                .is_none_or(|min| manifest.reliability >= min)
    }
}

/// The components of a provider's selection score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    /// `reliability × 40`.
    pub reliability: f64,
    /// `0..=20`, 20 for free providers.
    pub cost: f64,
    /// Observed success rate × 20.
    pub success_rate: f64,
    /// 10 if the rate-limit window has room, else 0.
    pub availability: f64,
    /// Minutes since last use, capped at 10.
    pub recency: f64,
}

impl ScoreBreakdown {
    /// Sum of all components.
    pub fn total(&self) -> f64 {
        self.reliability + self.cost + self.success_rate + self.availability + self.recency
    }
}

#[derive(Debug)]
struct ProviderStats {
    call_count: u64,
    error_count: u64,
    last_used: Option<Instant>,
    last_used_at: Option<DateTime<Utc>>,
    window: Option<RequestWindow>,
}

impl ProviderStats {
    fn success_rate(&self) -> f64 {
        if self.call_count == 0 {
            UNSEEN_SUCCESS_RATE
        } else {
            (self.call_count - self.error_count) as f64 / self.call_count as f64
        }
    }
}

/// One registered provider: its manifest plus live counters.
#[derive(Debug)]
pub struct ProviderEntry {
    id: ProviderId,
    manifest: ProviderManifest,
    owner: Option<String>,
    stats: Mutex<ProviderStats>,
}

impl ProviderEntry {
    /// Build an entry with zeroed counters.
    pub fn new(id: impl Into<String>, manifest: ProviderManifest, owner: Option<String>) -> Self {
        let window = manifest
            .rate_limit
            .map(|limit| RequestWindow::new(limit.requests as usize, limit.window()));
        Self {
            id: ProviderId::new(id),
            manifest,
            owner,
            stats: Mutex::new(ProviderStats {
                call_count: 0,
                error_count: 0,
                last_used: None,
                last_used_at: None,
                window,
            }),
        }
    }

    /// The provider id.
    pub fn id(&self) -> &ProviderId {
        &self.id
    }

    /// The static manifest.
    pub fn manifest(&self) -> &ProviderManifest {
        &self.manifest
    }

    /// The capability that registered this provider, if any.
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    fn stats(&self) -> MutexGuard<'_, ProviderStats> {
        // Counters are updated in one statement under the lock; a panic
        // elsewhere cannot leave them half-written.
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a slot in the rate-limit window at `now`.
    ///
    /// Returns `false`, recording nothing, when the window is full. Check
    /// and append happen under one lock so concurrent callers cannot
    /// overshoot the budget.
    pub fn try_admit(&self, now: Instant) -> bool {
        let mut stats = self.stats();
        match stats.window.as_mut() {
            Some(window) if !window.has_capacity(now) => false,
            Some(window) => {
                window.record(now);
                true
            }
            None => true,
        }
    }

    /// Record the outcome of one call.
    pub fn record_call(&self, success: bool) {
        let mut stats = self.stats();
        stats.call_count += 1;
        if !success {
            stats.error_count += 1;
        }
        stats.last_used = Some(Instant::now());
        stats.last_used_at = Some(Utc::now());
    }

    /// Score this provider at `now`.
    pub fn score(&self, config: &SelectorConfig, now: Instant) -> ScoreBreakdown {
        let stats = self.stats();
        let cost = self.manifest.cost.to_f64().unwrap_or(f64::MAX).max(0.0);
        let cost_score = if config.cost_ceiling > 0.0 {
            COST_WEIGHT * (1.0 - cost.min(config.cost_ceiling) / config.cost_ceiling)
        } else if cost == 0.0 {
            COST_WEIGHT
        } else {
            0.0
        };
        let availability = match &stats.window {
            Some(window) if !window.has_capacity(now) => 0.0,
            _ => AVAILABILITY_BONUS,
        };
        let recency = stats.last_used.map_or(RECENCY_CAP, |last| {
            let minutes = now.saturating_duration_since(last).as_secs_f64() / 60.0;
            minutes.min(RECENCY_CAP)
        });
        ScoreBreakdown {
            reliability: self.manifest.reliability * RELIABILITY_WEIGHT,
            cost: cost_score,
            success_rate: stats.success_rate() * SUCCESS_WEIGHT,
            availability,
            recency,
        }
    }

    /// A read-only view of the counters.
    pub fn snapshot(&self, config: &SelectorConfig) -> ProviderSnapshot {
        let now = Instant::now();
        let score = self.score(config, now).total();
        let stats = self.stats();
        ProviderSnapshot {
            id: self.id.clone(),
            owner: self.owner.clone(),
            call_count: stats.call_count,
            error_count: stats.error_count,
            success_rate: stats.success_rate(),
            last_used_at: stats.last_used_at,
            requests_in_window: stats.window.as_ref().map_or(0, |w| w.in_window(now)),
            score,
        }
    }
}

/// Point-in-time view of one provider's counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSnapshot {
    /// Provider id.
    pub id: ProviderId,
    /// Owning capability, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Calls issued.
    pub call_count: u64,
    /// Calls that failed.
    pub error_count: u64,
    /// Observed success rate (0.5 before the first call).
    pub success_rate: f64,
    /// Wall-clock time of the last call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    /// Requests inside the current rate-limit window.
    pub requests_in_window: usize,
    /// Current selection score.
    pub score: f64,
}

/// Registry of providers, in registration order.
///
/// Shared across concurrent executions; each provider's counters sit
/// behind their own lock so updates to one never block another.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    entries: RwLock<IndexMap<String, Arc<ProviderEntry>>>,
    config: SelectorConfig,
}

impl ProviderRegistry {
    /// An empty registry with default selector settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty registry with the given selector settings.
    pub fn with_config(config: SelectorConfig) -> Self {
        Self {
            entries: RwLock::new(IndexMap::new()),
            config,
        }
    }

    /// Selector settings.
    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, IndexMap<String, Arc<ProviderEntry>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, IndexMap<String, Arc<ProviderEntry>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register one provider. Ids are unique.
    pub fn register(
        &self,
        id: impl Into<String>,
        manifest: ProviderManifest,
    ) -> Result<(), EngineError> {
        let id = id.into();
        manifest.validate(&id)?;
        let mut entries = self.write();
        if entries.contains_key(&id) {
            return Err(EngineError::InvalidParameters(format!(
                "provider '{id}' is already registered"
            )));
        }
        tracing::debug!(provider = %id, "registering provider");
        entries.insert(id.clone(), Arc::new(ProviderEntry::new(id, manifest, None)));
        Ok(())
    }

    /// Register a batch of providers tagged with `owner`, all or nothing.
    pub fn register_all<I>(&self, owner: &str, providers: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = (String, ProviderManifest)>,
    {
        let batch: Vec<(String, ProviderManifest)> = providers.into_iter().collect();
        let mut entries = self.write();
        for (i, (id, manifest)) in batch.iter().enumerate() {
            manifest.validate(id)?;
            if entries.contains_key(id) || batch[..i].iter().any(|(other, _)| other == id) {
                return Err(EngineError::InvalidParameters(format!(
                    "provider '{id}' is already registered"
                )));
            }
        }
        for (id, manifest) in batch {
            let entry = ProviderEntry::new(id.clone(), manifest, Some(owner.to_string()));
            entries.insert(id, Arc::new(entry));
        }
        Ok(())
    }

    /// Remove every provider registered by `owner`. Returns how many were removed.
    pub fn remove_owned_by(&self, owner: &str) -> usize {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.owner() != Some(owner));
        before - entries.len()
    }

    /// Look up a provider by id.
    pub fn get(&self, id: &str) -> Option<Arc<ProviderEntry>> {
        self.read().get(id).cloned()
    }

    /// Look up a provider by id, failing with `ProviderUnavailable`.
    pub fn require(&self, id: &str) -> Result<Arc<ProviderEntry>, EngineError> {
        self.get(id)
            .ok_or_else(|| EngineError::ProviderUnavailable(format!("unknown provider '{id}'")))
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Record the outcome of one call against `id`.
    pub fn record_call(&self, id: &str, success: bool) -> Result<(), EngineError> {
        self.require(id)?.record_call(success);
        Ok(())
    }

    /// Score breakdown for `id` right now.
    pub fn score(&self, id: &str) -> Option<ScoreBreakdown> {
        self.get(id)
            .map(|entry| entry.score(&self.config, Instant::now()))
    }

    /// Pick the best provider tagged with `category` that meets `requirements`.
    ///
    /// Ties keep the provider registered first.
    pub fn select_best(
        &self,
        category: &str,
        requirements: &Requirements,
    ) -> Result<Arc<ProviderEntry>, EngineError> {
        let now = Instant::now();
        let entries = self.read();
        let mut best: Option<(f64, &Arc<ProviderEntry>)> = None;
        for entry in entries.values() {
            let manifest = entry.manifest();
            if !manifest.categories.iter().any(|c| c == category) || !requirements.admits(manifest)
            {
                continue;
            }
            let score = entry.score(&self.config, now).total();
            if best.is_none_or(|(top, _)| score > top) {
                best = Some((score, entry));
            }
        }
        best.map(|(score, entry)| {
            tracing::debug!(category, provider = %entry.id(), score, "selected provider");
            Arc::clone(entry)
        })
        .ok_or_else(|| {
            EngineError::ProviderUnavailable(format!(
                "no provider in category '{category}' meets the requirements"
            ))
        })
    }

    /// Snapshots of every provider, in registration order.
    pub fn snapshot(&self) -> Vec<ProviderSnapshot> {
        self.read()
            .values()
            .map(|entry| entry.snapshot(&self.config))
            .collect()
    }
}

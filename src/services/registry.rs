//! Process-wide provider selection with TTL caching and single-retry failover.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;

use crate::config::ProvidersSettings;
use crate::services::providers::{
    AnthropicProvider, GenerateOptions, OllamaProvider, OpenAiProvider, Provider,
    ProviderDescriptor, ProviderError,
};

/// Primary call plus one retry on the next-best provider
const MAX_ATTEMPTS: usize = 2;

/// Selection and timeout parameters
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub probe_timeout: Duration,
    pub generate_timeout: Duration,
    pub selection_ttl: Duration,
    /// How long a provider that failed a call is skipped, across re-probes
    pub failure_cooldown: Duration,
    pub local_bonus: f64,
    pub cost_cap: f64,
    pub cost_weight: f64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(2),
            generate_timeout: Duration::from_secs(10),
            selection_ttl: Duration::from_secs(300),
            failure_cooldown: Duration::from_secs(300),
            local_bonus: 15.0,
            cost_cap: 0.01,
            cost_weight: 1000.0,
        }
    }
}

impl From<&ProvidersSettings> for RegistryConfig {
    fn from(settings: &ProvidersSettings) -> Self {
        Self {
            probe_timeout: Duration::from_secs(settings.probe_timeout_secs.max(1)),
            generate_timeout: Duration::from_secs(settings.generate_timeout_secs.max(1)),
            selection_ttl: Duration::from_secs(settings.selection_ttl_secs),
            failure_cooldown: Duration::from_secs(settings.failure_cooldown_secs),
            local_bonus: settings.local_bonus,
            cost_cap: settings.cost_cap,
            cost_weight: settings.cost_weight,
        }
    }
}

/// Result of a registry call
#[derive(Debug)]
pub enum ProviderOutcome<T> {
    Generated { value: T, provider: String },
    Degraded(DegradeReason),
}

impl<T> ProviderOutcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ProviderOutcome<U> {
        match self {
            ProviderOutcome::Generated { value, provider } => ProviderOutcome::Generated {
                value: f(value),
                provider,
            },
            ProviderOutcome::Degraded(reason) => ProviderOutcome::Degraded(reason),
        }
    }
}

/// Why no provider output is available
#[derive(Debug)]
pub enum DegradeReason {
    NoProviderAvailable,
    AllAttemptsFailed { attempts: Vec<FailedAttempt> },
    /// The caller's deadline passed before a provider answered
    BudgetExhausted { attempts: Vec<FailedAttempt> },
}

impl std::fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DegradeReason::NoProviderAvailable => write!(f, "no provider available"),
            DegradeReason::AllAttemptsFailed { attempts } => {
                let names: Vec<&str> = attempts.iter().map(|a| a.provider.as_str()).collect();
                write!(f, "all attempts failed ({})", names.join(", "))
            }
            DegradeReason::BudgetExhausted { attempts } => {
                write!(f, "request budget exhausted after {} attempts", attempts.len())
            }
        }
    }
}

#[derive(Debug)]
pub struct FailedAttempt {
    pub provider: String,
    pub error: ProviderError,
}

#[derive(Default)]
struct Selection {
    /// Every configured provider, available ones first by descending score
    ranking: Vec<ProviderDescriptor>,
    probed_at: Option<Instant>,
    invalidated: bool,
    /// When each provider last failed a call; survives re-probes
    failed: HashMap<String, Instant>,
}

impl Selection {
    fn is_fresh(&self, ttl: Duration) -> bool {
        !self.invalidated && self.probed_at.is_some_and(|at| at.elapsed() < ttl)
    }

    fn is_cooling_down(&self, name: &str, cooldown: Duration) -> bool {
        self.failed.get(name).is_some_and(|at| at.elapsed() < cooldown)
    }

    fn is_usable(&self, descriptor: &ProviderDescriptor, cooldown: Duration) -> bool {
        descriptor.available && !self.is_cooling_down(&descriptor.name, cooldown)
    }
}

enum ProviderCall<'a> {
    Generate { prompt: &'a str, options: &'a GenerateOptions },
    Structured { prompt: &'a str },
}

enum ProviderOutput {
    Text(String),
    Structured(Value),
}

impl ProviderCall<'_> {
    async fn run(&self, provider: &dyn Provider) -> Result<ProviderOutput, ProviderError> {
        match self {
            ProviderCall::Generate { prompt, options } => {
                provider.generate(prompt, options).await.map(ProviderOutput::Text)
            }
            ProviderCall::Structured { prompt } => provider
                .extract_structured(prompt)
                .await
                .map(ProviderOutput::Structured),
        }
    }
}

/// Registry of text-generation backends
///
/// Holds the only cross-request provider state: the probed ranking and the
/// recent failures. A provider that fails a call sits out for
/// `failure_cooldown`, even if a later probe reports it available. Probing is
/// single-flight and the new ranking is swapped in under the lock in one step,
/// so a cancelled probe leaves the previous ranking untouched.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
    config: RegistryConfig,
    selection: RwLock<Selection>,
    probe_lock: Mutex<()>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Arc<dyn Provider>>, config: RegistryConfig) -> Self {
        Self {
            providers,
            config,
            selection: RwLock::new(Selection::default()),
            probe_lock: Mutex::new(()),
        }
    }

    /// Registry without backends; every call degrades
    pub fn empty() -> Self {
        Self::new(Vec::new(), RegistryConfig::default())
    }

    /// Build the configured backends
    pub fn from_settings(settings: &ProvidersSettings) -> Result<Self, ProviderError> {
        let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

        if let Some(entry) = settings.ollama.as_ref().filter(|e| e.enabled) {
            providers.push(Arc::new(OllamaProvider::new(entry.profile.clone())?));
        }
        if let Some(entry) = settings.openai.as_ref().filter(|e| e.enabled) {
            providers.push(Arc::new(OpenAiProvider::new(entry.profile.clone())?));
        }
        if let Some(entry) = settings.anthropic.as_ref().filter(|e| e.enabled) {
            providers.push(Arc::new(AnthropicProvider::new(entry.profile.clone())?));
        }

        tracing::info!(
            "Provider registry configured with {} backends: {:?}",
            providers.len(),
            providers.iter().map(|p| p.name()).collect::<Vec<_>>()
        );

        Ok(Self::new(providers, RegistryConfig::from(settings)))
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Selection score of a backend; higher is better
    pub fn selection_score(&self, provider: &dyn Provider) -> f64 {
        let latency_ms = provider.latency().as_millis() as f64;
        let mut score = (1000.0 - latency_ms) / 10.0
            + (self.config.cost_cap - provider.cost()) * self.config.cost_weight;
        if provider.is_local() {
            score += self.config.local_bonus;
        }
        score
    }

    /// Best available provider, re-probing when the cached ranking is stale
    pub async fn select_provider(&self) -> Option<Arc<dyn Provider>> {
        self.ranked_providers().await.into_iter().next()
    }

    /// Force a fresh probe of every provider
    pub async fn refresh(&self) -> Vec<ProviderDescriptor> {
        let _guard = self.probe_lock.lock().await;
        self.probe_and_publish().await
    }

    /// Last published ranking, without probing
    pub async fn descriptors(&self) -> Vec<ProviderDescriptor> {
        self.selection.read().await.ranking.clone()
    }

    /// Name of the provider the next call would use, without probing
    pub async fn active_provider(&self) -> Option<String> {
        let selection = self.selection.read().await;
        selection
            .ranking
            .iter()
            .find(|d| selection.is_usable(d, self.config.failure_cooldown))
            .map(|d| d.name.clone())
    }

    pub async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> ProviderOutcome<String> {
        self.generate_until(prompt, options, None).await
    }

    /// Generate text, giving up once `deadline` passes
    pub async fn generate_until(
        &self,
        prompt: &str,
        options: &GenerateOptions,
        deadline: Option<Instant>,
    ) -> ProviderOutcome<String> {
        self.call(ProviderCall::Generate { prompt, options }, deadline)
            .await
            .map(|output| match output {
                ProviderOutput::Text(text) => text,
                ProviderOutput::Structured(value) => value.to_string(),
            })
    }

    pub async fn extract_structured(&self, prompt: &str) -> ProviderOutcome<Value> {
        self.extract_structured_until(prompt, None).await
    }

    /// Structured extraction, giving up once `deadline` passes
    pub async fn extract_structured_until(
        &self,
        prompt: &str,
        deadline: Option<Instant>,
    ) -> ProviderOutcome<Value> {
        self.call(ProviderCall::Structured { prompt }, deadline)
            .await
            .map(|output| match output {
                ProviderOutput::Structured(value) => value,
                ProviderOutput::Text(text) => Value::String(text),
            })
    }

    async fn call(
        &self,
        call: ProviderCall<'_>,
        deadline: Option<Instant>,
    ) -> ProviderOutcome<ProviderOutput> {
        let candidates = self.ranked_providers().await;
        if candidates.is_empty() {
            return ProviderOutcome::Degraded(DegradeReason::NoProviderAvailable);
        }

        let mut attempts = Vec::new();
        for provider in candidates.iter().take(MAX_ATTEMPTS) {
            let limit = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        tracing::debug!("Request budget spent before trying {}", provider.name());
                        let reason = DegradeReason::BudgetExhausted { attempts };
                        return ProviderOutcome::Degraded(reason);
                    }
                    remaining.min(self.config.generate_timeout)
                }
                None => self.config.generate_timeout,
            };

            let started = Instant::now();
            // A timeout cut short by the caller's deadline says nothing about the provider
            let (result, cut_by_deadline) =
                match tokio::time::timeout(limit, call.run(provider.as_ref())).await {
                    Ok(result) => (result, false),
                    Err(_) => (
                        Err(ProviderError::Timeout(limit)),
                        limit < self.config.generate_timeout,
                    ),
                };

            match result {
                Ok(output) => {
                    tracing::debug!(
                        "Provider {} answered in {}ms",
                        provider.name(),
                        started.elapsed().as_millis()
                    );
                    return ProviderOutcome::Generated {
                        value: output,
                        provider: provider.name().to_string(),
                    };
                }
                Err(error) => {
                    if cut_by_deadline {
                        tracing::debug!("Provider {} ran out of request budget", provider.name());
                    } else {
                        tracing::warn!("Provider {} failed: {}", provider.name(), error);
                        self.mark_failed(provider.name()).await;
                    }
                    attempts.push(FailedAttempt {
                        provider: provider.name().to_string(),
                        error,
                    });
                }
            }
        }

        ProviderOutcome::Degraded(DegradeReason::AllAttemptsFailed { attempts })
    }

    /// Start a provider's cooldown and invalidate the cached ranking
    async fn mark_failed(&self, name: &str) {
        let mut selection = self.selection.write().await;
        selection.failed.insert(name.to_string(), Instant::now());
        selection.invalidated = true;
    }

    async fn ranked_providers(&self) -> Vec<Arc<dyn Provider>> {
        if self.providers.is_empty() {
            return Vec::new();
        }

        {
            let selection = self.selection.read().await;
            if selection.is_fresh(self.config.selection_ttl) {
                return self.resolve(&selection);
            }
        }

        let _guard = self.probe_lock.lock().await;
        {
            // Another request may have probed while we waited
            let selection = self.selection.read().await;
            if selection.is_fresh(self.config.selection_ttl) {
                return self.resolve(&selection);
            }
        }

        self.probe_and_publish().await;
        let selection = self.selection.read().await;
        self.resolve(&selection)
    }

    fn resolve(&self, selection: &Selection) -> Vec<Arc<dyn Provider>> {
        selection
            .ranking
            .iter()
            .filter(|d| selection.is_usable(d, self.config.failure_cooldown))
            .filter_map(|d| self.providers.iter().find(|p| p.name() == d.name).cloned())
            .collect()
    }

    /// Caller must hold `probe_lock`
    async fn probe_and_publish(&self) -> Vec<ProviderDescriptor> {
        let ranking = self.probe_all().await;

        let mut selection = self.selection.write().await;
        let cooldown = self.config.failure_cooldown;
        let mut failed = std::mem::take(&mut selection.failed);
        failed.retain(|_, at| at.elapsed() < cooldown);

        *selection = Selection {
            ranking: ranking.clone(),
            probed_at: Some(Instant::now()),
            invalidated: false,
            failed,
        };

        tracing::info!(
            "Provider ranking refreshed: {:?}",
            ranking
                .iter()
                .filter(|d| d.available)
                .map(|d| d.name.as_str())
                .collect::<Vec<_>>()
        );

        ranking
    }

    async fn probe_all(&self) -> Vec<ProviderDescriptor> {
        let mut probes = JoinSet::new();
        for (position, provider) in self.providers.iter().enumerate() {
            let provider = Arc::clone(provider);
            let timeout = self.config.probe_timeout;
            probes.spawn(async move {
                let available = tokio::time::timeout(timeout, provider.is_available())
                    .await
                    .unwrap_or_else(|_| {
                        tracing::debug!(
                            "Probe of {} timed out after {:?}",
                            provider.name(),
                            timeout
                        );
                        false
                    });
                (position, available)
            });
        }

        let mut availability = vec![false; self.providers.len()];
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((position, available)) => availability[position] = available,
                Err(e) => tracing::warn!("Provider probe task failed: {}", e),
            }
        }

        let probed_at = chrono::Utc::now();
        let mut ranking: Vec<ProviderDescriptor> = self
            .providers
            .iter()
            .zip(availability)
            .map(|(provider, available)| ProviderDescriptor {
                name: provider.name().to_string(),
                cost_per_k_tokens: provider.cost(),
                avg_latency_ms: provider.latency().as_millis() as u64,
                local: provider.is_local(),
                available,
                score: self.selection_score(provider.as_ref()),
                probed_at,
            })
            .collect();

        // Stable: equal scores keep configuration order
        ranking.sort_by(|a, b| {
            b.available
                .cmp(&a.available)
                .then(b.score.total_cmp(&a.score))
        });
        ranking
    }
}

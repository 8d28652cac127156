//! Component wiring
//!
//! Builds every component from one [`Config`] and injects the shared
//! collaborators (store, executor, alert manager, AI availability) through
//! constructors.

use std::sync::Arc;

use tracing::{info, warn};

use crate::analytics::TrendAnalyzer;
use crate::batch::{BatchQueue, ContentProducer, WorkItemProducer};
use crate::config::Config;
use crate::error::Result;
use crate::executor::Executor;
use crate::governor::{MetricsSource, QueueDepth, ResourceGovernor, SystemMetricsSource};
use crate::llm::{AiAvailability, OllamaClient, TextGenerator};
use crate::notifications::AlertManager;
use crate::orchestrator::{Orchestrator, OrchestratorDeps};
use crate::scheduler::{RuleManager, SchedulePlanner};
use crate::scoring::ContentScorer;
use crate::store::ContentStore;

/// Every component of a running pipeline
#[derive(Clone)]
pub struct App {
    pub config: Config,
    pub store: Arc<dyn ContentStore>,
    pub alerts: Arc<AlertManager>,
    pub executor: Arc<Executor>,
    pub availability: Arc<AiAvailability>,
    pub governor: Arc<ResourceGovernor>,
    pub trends: Arc<TrendAnalyzer>,
    pub scorer: Arc<ContentScorer>,
    pub planner: Arc<SchedulePlanner>,
    pub batches: Arc<BatchQueue>,
    pub orchestrator: Arc<Orchestrator>,
}

impl App {
    pub fn builder(config: Config, store: Arc<dyn ContentStore>) -> AppBuilder {
        AppBuilder {
            config,
            store,
            generator: None,
            producer: None,
            metrics_source: None,
        }
    }
}

/// Builder for [`App`]; unset collaborators get their production defaults
pub struct AppBuilder {
    config: Config,
    store: Arc<dyn ContentStore>,
    generator: Option<Arc<dyn TextGenerator>>,
    producer: Option<Arc<dyn ContentProducer>>,
    metrics_source: Option<Arc<dyn MetricsSource>>,
}

impl AppBuilder {
    /// AI collaborator; defaults to Ollama when `llm.enabled`
    pub fn generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn producer(mut self, producer: Arc<dyn ContentProducer>) -> Self {
        self.producer = Some(producer);
        self
    }

    /// Metrics source for the governor; defaults to live system metrics
    pub fn metrics_source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.metrics_source = Some(source);
        self
    }

    /// Wire every component
    ///
    /// With webhooks configured this spawns the alert delivery worker, so it
    /// must run inside a tokio runtime.
    pub fn build(self) -> Result<App> {
        let config = self.config;
        let store = self.store;

        let alerts = Arc::new(AlertManager::from_config(&config.alerts)?);
        let executor = Arc::new(Executor::new(config.executor.clone(), alerts.clone()));
        // detached; the worker lives as long as the runtime
        if alerts.start_delivery(executor.clone()).is_none() {
            info!("No alert channels configured, alerts are recorded only");
        }
        let availability = Arc::new(AiAvailability::new());

        let generator = match self.generator {
            Some(generator) => Some(generator),
            None if config.llm.enabled => match OllamaClient::with_config(config.llm.clone()) {
                Ok(client) => Some(Arc::new(client) as Arc<dyn TextGenerator>),
                Err(e) => {
                    warn!(error = %e, "AI collaborator unavailable, running on heuristics");
                    None
                }
            },
            None => None,
        };

        let governor = Arc::new(ResourceGovernor::new(
            config.governor.clone(),
            store.clone(),
            executor.clone(),
            alerts.clone(),
        ));

        let trends = Arc::new(TrendAnalyzer::new(
            config.trends.clone(),
            executor.clone(),
            generator.clone(),
            availability.clone(),
        ));
        let scorer = Arc::new(ContentScorer::new(
            config.scoring.clone(),
            config.languages.clone(),
            trends.clone(),
            executor.clone(),
            generator.clone(),
            availability.clone(),
        ));

        let producer = self
            .producer
            .unwrap_or_else(|| Arc::new(WorkItemProducer::new(store.clone())) as Arc<dyn ContentProducer>);
        let batches = Arc::new(BatchQueue::new(
            config.batch.clone(),
            &config.languages,
            governor.clone(),
            executor.clone(),
            producer,
        ));

        let planner = Arc::new(
            SchedulePlanner::new(
                config.planner.clone(),
                store.clone(),
                executor.clone(),
                trends.clone(),
                scorer.clone(),
                Arc::new(RuleManager::new()),
            )
            .with_batch_queue(batches.clone()),
        );

        let metrics_source = self.metrics_source.unwrap_or_else(|| {
            Arc::new(SystemMetricsSource::new(
                executor.clone(),
                batches.clone() as Arc<dyn QueueDepth>,
                store.clone(),
                chrono::Duration::seconds(config.governor.api_failure_window_secs),
            )) as Arc<dyn MetricsSource>
        });

        let orchestrator = Arc::new(Orchestrator::new(
            config.orchestrator.clone(),
            OrchestratorDeps {
                store: store.clone(),
                executor: executor.clone(),
                governor: governor.clone(),
                trends: trends.clone(),
                planner: planner.clone(),
                batches: batches.clone(),
                alerts: alerts.clone(),
                availability: availability.clone(),
                metrics_source,
            },
        ));

        info!(
            languages = config.languages.len(),
            ai = generator.is_some(),
            "Components initialized"
        );

        Ok(App {
            config,
            store,
            alerts,
            executor,
            availability,
            governor,
            trends,
            scorer,
            planner,
            batches,
            orchestrator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_build_with_defaults() {
        let mut config = Config::default();
        config.llm.enabled = false;
        let app = App::builder(config, Arc::new(MemoryStore::new()))
            .build()
            .unwrap();

        assert_eq!(app.scorer.languages().len(), app.config.languages.len());
        assert_eq!(app.governor.limits().max_concurrent_jobs, 10);
        assert!(app.batches.batches().await.is_empty());
    }
}

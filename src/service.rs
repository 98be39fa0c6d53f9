//! Service driver
//!
//! Wires the pipeline together: the fetch cycle (fetch → new-article
//! filter → extraction → store → bounded information-centric analysis)
//! and the digest cycle (unsent units → curator → notifier → mark-sent),
//! plus the scheduler registration and the one-shot-run gate the admin
//! surface uses.

use crate::agents::{Curator, EntityBackfill, Orchestrator, TraceManager};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::feeds::FeedRegistry;
use crate::fetcher::{ContentExtractor, FeedFetcher};
use crate::llm::LlmClient;
use crate::models::{AnalysisMode, DigestTotals};
use crate::notifier::Notifier;
use crate::scheduler::{parse_interval, parse_wall_clock, Scheduler};
use crate::storage::{ArticleStore, Database, EntityStore, InformationStore};
use crate::telemetry::TelemetryRecorder;
use crate::vector::{HashedVectorIndex, VectorIndex};
use chrono_tz::Tz;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::{broadcast, Semaphore};

/// Counters from one fetch cycle
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CycleStats {
    pub fetched: usize,
    pub new: usize,
    pub analyzed: usize,
    pub units: usize,
}

/// Per-run knobs (admin-triggered runs can override config defaults)
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub limit: Option<usize>,
    pub dry_run: bool,
    pub concurrency: Option<usize>,
}

pub struct BriefwireService {
    config: AppConfig,
    mode: AnalysisMode,

    registry: FeedRegistry,
    fetcher: FeedFetcher,
    extractor: ContentExtractor,

    article_store: ArticleStore,
    info_store: InformationStore,
    entity_store: EntityStore,
    telemetry: TelemetryRecorder,

    orchestrator: Orchestrator,
    curator: Curator,
    backfill: EntityBackfill,
    notifier: Notifier,

    /// Guards admin-triggered one-shot runs: the check and the set happen
    /// under one lock, so a second trigger while running is rejected.
    running: Mutex<bool>,
    last_error: RwLock<Option<String>>,
    last_stats: RwLock<CycleStats>,

    /// Progress events for the admin WS stream; the latest snapshot is
    /// kept for refresh recovery.
    progress_tx: broadcast::Sender<serde_json::Value>,
    progress_state: RwLock<serde_json::Value>,
}

impl BriefwireService {
    pub fn new(config: AppConfig, feeds_path: std::path::PathBuf, mode: AnalysisMode) -> Result<Self> {
        let telemetry = TelemetryRecorder::new(&config.telemetry)?;
        let llm = Arc::new(LlmClient::new(config.ai.clone(), telemetry.clone())?);

        let db = Database::open(&config.storage.database_path)?;
        let vector_path = config.data_dir().join("vectors.db");
        let index: Arc<dyn VectorIndex> = Arc::new(HashedVectorIndex::open(&vector_path)?);

        let article_store = ArticleStore::new(db.clone());
        let info_store = InformationStore::new(db.clone(), index.clone());
        let entity_store = EntityStore::new(db);

        let roots: Vec<String> = if config.filter.root_categories.is_empty() {
            crate::models::DEFAULT_ROOT_CATEGORIES
                .iter()
                .map(|s| s.to_string())
                .collect()
        } else {
            config.filter.root_categories.clone()
        };

        let trace_manager = TraceManager::new(config.data_dir().join("traces"));
        let mut orchestrator =
            Orchestrator::new(llm.clone(), index, roots, Some(trace_manager));
        orchestrator.set_information_store(info_store.clone());
        orchestrator.set_entity_store(entity_store.clone());

        let curator = Curator::new(
            llm.clone(),
            config.filter.top_pick_count,
            config.filter.min_score,
        );
        let backfill = EntityBackfill::new(llm, info_store.clone(), entity_store.clone());

        let (progress_tx, _) = broadcast::channel(256);

        Ok(Self {
            registry: FeedRegistry::new(feeds_path),
            fetcher: FeedFetcher::new(30, config.concurrency.max_concurrent_fetches)?,
            extractor: ContentExtractor::new(15, config.concurrency.max_concurrent_extractions)?,
            article_store,
            info_store,
            entity_store,
            telemetry,
            orchestrator,
            curator,
            backfill,
            notifier: Notifier::new(config.email.clone()),
            running: Mutex::new(false),
            last_error: RwLock::new(None),
            last_stats: RwLock::new(CycleStats::default()),
            progress_tx,
            progress_state: RwLock::new(serde_json::json!({"phase": "idle"})),
            config,
            mode,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn mode(&self) -> AnalysisMode {
        self.mode
    }

    pub fn registry(&self) -> &FeedRegistry {
        &self.registry
    }

    pub fn article_store(&self) -> &ArticleStore {
        &self.article_store
    }

    pub fn entity_store(&self) -> &EntityStore {
        &self.entity_store
    }

    pub fn telemetry(&self) -> &TelemetryRecorder {
        &self.telemetry
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub fn last_stats(&self) -> CycleStats {
        *self.last_stats.read()
    }

    /// Try to claim the run gate. Returns false when a run is already in
    /// flight.
    pub fn try_begin_run(&self) -> bool {
        let mut running = self.running.lock();
        if *running {
            false
        } else {
            *running = true;
            true
        }
    }

    pub fn end_run(&self) {
        *self.running.lock() = false;
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<serde_json::Value> {
        self.progress_tx.subscribe()
    }

    pub fn progress_state(&self) -> serde_json::Value {
        self.progress_state.read().clone()
    }

    fn emit_progress(&self, event: serde_json::Value) {
        *self.progress_state.write() = event.clone();
        let _ = self.progress_tx.send(event);
    }

    /// One fetch-and-analyze cycle.
    pub async fn fetch_and_analyze(&self, options: RunOptions) -> Result<CycleStats> {
        tracing::info!(mode = self.mode.as_str(), "Fetch cycle started");
        self.emit_progress(serde_json::json!({"phase": "fetching"}));

        let feeds = self.registry.list()?;
        let articles = self.fetcher.fetch_all(&feeds).await;
        let fetched = articles.len();

        // Only analyze articles the store has not seen
        let mut new_articles = Vec::new();
        for article in articles {
            if !self.article_store.exists(&article.url)? {
                new_articles.push(article);
            }
        }
        if let Some(limit) = options.limit {
            new_articles.truncate(limit);
        }
        let new = new_articles.len();
        if new == 0 {
            tracing::info!(fetched, "No new articles");
            self.emit_progress(serde_json::json!({"phase": "idle"}));
            let stats = CycleStats {
                fetched,
                ..Default::default()
            };
            *self.last_stats.write() = stats;
            return Ok(stats);
        }
        tracing::info!(fetched, new, "New articles found");

        self.emit_progress(serde_json::json!({"phase": "extracting", "count": new}));
        let enriched_articles = self.extractor.extract_all(new_articles).await;
        for article in &enriched_articles {
            self.article_store.upsert(article)?;
        }

        // Information-centric analysis with bounded concurrency; each
        // article's candidate loop stays sequential inside the orchestrator
        self.emit_progress(serde_json::json!({"phase": "analyzing", "count": new}));
        let concurrency = options
            .concurrency
            .unwrap_or(self.config.concurrency.max_concurrent_analyses)
            .max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let futures = enriched_articles.iter().map(|article| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                self.orchestrator.process_article(article, self.mode).await
            }
        });
        let unit_batches = futures::future::join_all(futures).await;
        let units: usize = unit_batches.iter().map(Vec::len).sum();

        let stats = CycleStats {
            fetched,
            new,
            analyzed: enriched_articles.len(),
            units,
        };
        *self.last_stats.write() = stats;
        self.emit_progress(serde_json::json!({"phase": "idle", "stats": stats}));
        tracing::info!(
            fetched = stats.fetched,
            new = stats.new,
            units = stats.units,
            "Fetch cycle complete"
        );
        Ok(stats)
    }

    /// One digest cycle: curate the unsent units, deliver, then atomically
    /// mark the selected units sent. Dry runs skip SMTP and the marking.
    pub async fn send_digest(&self, dry_run: bool) -> Result<bool> {
        tracing::info!(dry_run, "Digest cycle started");
        self.emit_progress(serde_json::json!({"phase": "curating"}));

        let units = self
            .info_store
            .get_unsent(self.config.filter.max_articles_per_digest)?;
        if units.is_empty() {
            tracing::info!("Nothing to send");
            self.emit_progress(serde_json::json!({"phase": "idle"}));
            return Ok(false);
        }

        let recent_titles: Vec<String> = self
            .article_store
            .get_recent_sent(7, crate::agents::HISTORY_WINDOW)?
            .into_iter()
            .map(|a| a.article.title)
            .collect();

        let stats = self.last_stats();
        let totals = DigestTotals {
            fetched: stats.fetched,
            analyzed: stats.analyzed,
            filtered: 0,
        };
        let (mut digest, _trace) = self.curator.curate(&units, &recent_titles, totals).await;
        digest.totals.filtered = digest.top_picks.len() + digest.quick_reads.len();

        // Hot-entity trends for the window ride along in the digest body
        digest.trends = self
            .entity_store
            .get_hot_entities(7, 8)
            .unwrap_or_default()
            .into_iter()
            .map(|h| crate::models::DigestTrend {
                entity_name: h.entity.canonical_name,
                recent_count: h.recent_count,
                trend: h.trend,
                change_pct: h.change_pct,
            })
            .collect();

        if digest.is_empty() {
            tracing::info!("Curator selected nothing");
            self.emit_progress(serde_json::json!({"phase": "idle"}));
            return Ok(false);
        }

        if dry_run {
            tracing::info!(
                top_picks = digest.top_picks.len(),
                quick_reads = digest.quick_reads.len(),
                "Dry run: skipping SMTP send"
            );
            self.emit_progress(serde_json::json!({"phase": "idle"}));
            return Ok(true);
        }

        self.emit_progress(serde_json::json!({"phase": "sending"}));
        let sent = self.notifier.send_digest(&digest, None).await?;
        if sent {
            self.info_store.mark_sent(&digest.selected_unit_ids())?;
        }
        self.emit_progress(serde_json::json!({"phase": "idle"}));
        Ok(sent)
    }

    /// One full cycle (used by `--once` and admin-triggered runs).
    pub async fn run_once(&self, options: RunOptions) -> Result<CycleStats> {
        if !self.try_begin_run() {
            return Err(Error::Internal("a run is already in progress".to_string()));
        }
        let result: Result<CycleStats> = async {
            let stats = self.fetch_and_analyze(options).await?;
            self.send_digest(options.dry_run).await?;
            Ok(stats)
        }
        .await;
        self.end_run();

        match &result {
            Ok(_) => *self.last_error.write() = None,
            Err(e) => *self.last_error.write() = Some(e.to_string()),
        }
        result
    }

    /// Register the recurring jobs and hand back the scheduler. The
    /// retention sweeps piggyback on the fetch job.
    pub fn start_scheduler(self: &Arc<Self>) -> Result<Scheduler> {
        let interval = parse_interval(&self.config.schedule.fetch_interval)?;
        let tz: Tz = self
            .config
            .schedule
            .timezone
            .parse()
            .map_err(|_| Error::Config(format!("invalid timezone: {}", self.config.schedule.timezone)))?;
        let mut times = Vec::new();
        for raw in &self.config.schedule.digest_times {
            times.push(parse_wall_clock(raw)?);
        }

        let mut scheduler = Scheduler::new();

        let service = self.clone();
        scheduler.add_interval_job("fetch", interval, move || {
            let service = service.clone();
            async move {
                if !service.try_begin_run() {
                    tracing::warn!("Skipping scheduled fetch: run in progress");
                    return Ok(());
                }
                let result = service.fetch_and_analyze(RunOptions::default()).await;
                // Retention sweeps ride along after each fetch
                let swept = service
                    .article_store
                    .cleanup(service.config.storage.article_retention_days)?;
                if swept > 0 {
                    tracing::info!(swept, "Article retention sweep");
                }
                service
                    .telemetry
                    .cleanup(service.config.telemetry.retention_days);
                let _ = service.backfill.run(50).await;
                service.end_run();
                result.map(|_| ())
            }
        });

        let service = self.clone();
        scheduler.add_daily_job("digest", times, tz, move || {
            let service = service.clone();
            async move {
                if !service.try_begin_run() {
                    tracing::warn!("Skipping scheduled digest: run in progress");
                    return Ok(());
                }
                let result = service.send_digest(false).await;
                service.end_run();
                result.map(|_| ())
            }
        });

        Ok(scheduler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn service() -> (Arc<BriefwireService>, TempDir) {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.storage.database_path = dir.path().join("test.db");
        config.telemetry.enabled = false;
        let service = BriefwireService::new(
            config,
            dir.path().join("feeds.toml"),
            AnalysisMode::Standard,
        )
        .unwrap();
        (Arc::new(service), dir)
    }

    #[test]
    fn test_run_gate_rejects_second_trigger() {
        let (service, _dir) = service();
        assert!(service.try_begin_run());
        assert!(!service.try_begin_run());
        service.end_run();
        assert!(service.try_begin_run());
        service.end_run();
    }

    #[tokio::test]
    async fn test_fetch_cycle_with_no_feeds() {
        let (service, _dir) = service();
        let stats = service
            .fetch_and_analyze(RunOptions::default())
            .await
            .unwrap();
        assert_eq!(stats.fetched, 0);
        assert_eq!(stats.new, 0);
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn test_digest_cycle_with_empty_store() {
        let (service, _dir) = service();
        let sent = service.send_digest(true).await.unwrap();
        assert!(!sent);
    }

    #[test]
    fn test_progress_state_snapshot() {
        let (service, _dir) = service();
        assert_eq!(service.progress_state()["phase"], "idle");
        service.emit_progress(serde_json::json!({"phase": "fetching"}));
        assert_eq!(service.progress_state()["phase"], "fetching");
    }
}

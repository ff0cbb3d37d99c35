//! djlm-analysis: analysis orchestration and derived-data engine
//!
//! Dispatches per-track analyzers to external processes, folds their output
//! into track attributes, derives cue points and clusters duplicates.

pub mod cues;
pub mod db;
pub mod dispatcher;
pub mod duplicates;
pub mod error;
pub mod import;
pub mod orchestrator;
pub mod tags;

pub use crate::error::{AnalysisError, EngineResult};

use djlm_common::config::TomlConfig;
use djlm_common::events::EventBus;
use std::sync::Arc;

use crate::cues::CueDerivationEngine;
use crate::db::Catalog;
use crate::dispatcher::{AnalyzerBackend, ProcessDispatcher, ScriptTable, WorkerPool};
use crate::duplicates::DuplicateClusteringEngine;
use crate::orchestrator::AnalysisOrchestrator;
use crate::tags::{LoftyTagWriter, NoopTagWriter, TagWriter};

/// Fully wired engine sharing one catalog and one event bus
pub struct AnalysisEngine {
    catalog: Arc<dyn Catalog>,
    event_bus: EventBus,
    orchestrator: AnalysisOrchestrator,
    cues: CueDerivationEngine,
    duplicates: DuplicateClusteringEngine,
}

impl AnalysisEngine {
    /// Engine running analyzer processes through a bounded worker pool
    pub fn new(config: &TomlConfig, catalog: Arc<dyn Catalog>, event_bus: EventBus) -> Self {
        let dispatcher = ProcessDispatcher::new(
            ScriptTable::from_config(&config.analysis),
            event_bus.clone(),
        );
        let backend: Arc<dyn AnalyzerBackend> =
            Arc::new(WorkerPool::new(dispatcher, config.analysis.max_workers));

        let tag_writer: Arc<dyn TagWriter> = if config.analysis.write_tags {
            Arc::new(LoftyTagWriter)
        } else {
            Arc::new(NoopTagWriter)
        };

        Self::with_backend(config, catalog, event_bus, backend, tag_writer)
    }

    /// Engine with a caller-supplied analyzer backend and tag writer
    pub fn with_backend(
        config: &TomlConfig,
        catalog: Arc<dyn Catalog>,
        event_bus: EventBus,
        backend: Arc<dyn AnalyzerBackend>,
        tag_writer: Arc<dyn TagWriter>,
    ) -> Self {
        let orchestrator = AnalysisOrchestrator::new(
            Arc::clone(&catalog),
            backend,
            tag_writer,
            event_bus.clone(),
            config.analysis.clone(),
        );
        let cues = CueDerivationEngine::new(
            Arc::clone(&catalog),
            event_bus.clone(),
            config.cues.write_policy,
        );
        let duplicates = DuplicateClusteringEngine::new(
            Arc::clone(&catalog),
            event_bus.clone(),
            config.duplicates.threshold,
        );

        Self {
            catalog,
            event_bus,
            orchestrator,
            cues,
            duplicates,
        }
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn orchestrator(&self) -> &AnalysisOrchestrator {
        &self.orchestrator
    }

    pub fn cues(&self) -> &CueDerivationEngine {
        &self.cues
    }

    pub fn duplicates(&self) -> &DuplicateClusteringEngine {
        &self.duplicates
    }

    /// Terminate every in-flight analyzer process
    pub fn shutdown(&self) -> usize {
        self.orchestrator.shutdown()
    }
}

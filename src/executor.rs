//! Fusion executor: drives the pull → resolve → write loop.
//!
//! Owns the run-scoped mutable state — the synthesized-identifier generator
//! and the output-limit counter — and hands it to the resolution engine by
//! reference, keeping the engine itself stateless and testable.
//!
//! The output ceiling is enforced at whole-description granularity: a
//! description is only started if all of its statements still fit, so output
//! never exceeds the ceiling and no description is ever split across it.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use crate::canon;
use crate::error::FuseResult;
use crate::model::ResourceDescription;
use crate::resolve::{ResolutionEngine, ScoringParams, StrategyTable, SyntheticIds};
use crate::sink::StatementSink;

/// Executor settings.
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Ceiling on written statements. Zero means unlimited.
    pub max_output_statements: u64,
    /// Where to persist the canonical subjects emitted this run. The file
    /// feeds the next run's preferred-identifier set, so already-published
    /// identifiers keep winning representative selection.
    pub canonical_output: Option<PathBuf>,
}

/// Summary of one fusion run.
#[derive(Debug, Clone, Copy, Default)]
pub struct FusionStats {
    /// Resource descriptions resolved and written.
    pub descriptions: u64,
    /// Resolved statements written to the sink.
    pub statements_written: u64,
    /// Identifiers minted for dependent resources.
    pub synthesized_ids: u64,
    /// True if the run stopped at the output ceiling.
    pub limit_reached: bool,
}

impl fmt::Display for FusionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "fusion run summary")?;
        writeln!(f, "  descriptions:    {}", self.descriptions)?;
        writeln!(f, "  statements:      {}", self.statements_written)?;
        writeln!(f, "  synthesized ids: {}", self.synthesized_ids)?;
        writeln!(f, "  limit reached:   {}", self.limit_reached)?;
        Ok(())
    }
}

/// Drives the fusion loop over a description stream.
pub struct FusionExecutor {
    strategies: StrategyTable,
    scoring: ScoringParams,
    description_predicates: BTreeSet<String>,
    config: ExecutorConfig,
    ids: SyntheticIds,
}

impl FusionExecutor {
    pub fn new(
        strategies: StrategyTable,
        scoring: ScoringParams,
        description_predicates: BTreeSet<String>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            strategies,
            scoring,
            description_predicates,
            config,
            ids: SyntheticIds::new(),
        }
    }

    /// Fixed identifier salt, for reproducible tests.
    pub fn with_ids(mut self, ids: SyntheticIds) -> Self {
        self.ids = ids;
        self
    }

    /// Pull descriptions, resolve each, write the output, enforce the
    /// ceiling. The sink is closed before returning, on success and failure
    /// alike.
    pub fn run<I>(&self, descriptions: I, sink: &mut dyn StatementSink) -> FuseResult<FusionStats>
    where
        I: IntoIterator<Item = FuseResult<ResourceDescription>>,
    {
        let engine = ResolutionEngine::new(
            &self.strategies,
            &self.scoring,
            &self.description_predicates,
            &self.ids,
        );
        let limit = self.config.max_output_statements;
        let mut stats = FusionStats::default();
        let mut emitted_subjects: BTreeSet<String> = BTreeSet::new();

        let result: FuseResult<()> = (|| {
            for item in descriptions {
                let description = item?;
                if limit > 0 && stats.statements_written >= limit {
                    stats.limit_reached = true;
                    break;
                }
                let statements = engine.resolve(&description)?;
                if limit > 0 && stats.statements_written + statements.len() as u64 > limit {
                    // The next description would cross the ceiling; stop
                    // before starting it rather than splitting its output.
                    stats.limit_reached = true;
                    tracing::info!(
                        written = stats.statements_written,
                        pending = statements.len(),
                        limit,
                        "output ceiling reached"
                    );
                    break;
                }
                for statement in &statements {
                    sink.write(statement)?;
                }
                stats.statements_written += statements.len() as u64;
                stats.descriptions += 1;
                emitted_subjects.insert(description.subject.clone());
            }
            Ok(())
        })();
        let close_result = sink.close();
        result?;
        close_result?;

        stats.synthesized_ids = self.ids.minted();
        if let Some(path) = &self.config.canonical_output {
            canon::save_uri_set(path, emitted_subjects.iter())?;
            tracing::debug!(
                path = %path.display(),
                subjects = emitted_subjects.len(),
                "persisted emitted canonical subjects"
            );
        }
        tracing::info!(
            descriptions = stats.descriptions,
            statements = stats.statements_written,
            limit_reached = stats.limit_reached,
            "fusion run complete"
        );
        Ok(stats)
    }
}

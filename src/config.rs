//! Fusion configuration: TOML surface and validation.
//!
//! The config file names the sources, sinks, per-predicate strategies, and
//! scoring constants for one run. [`FusionConfig::validate`] resolves every
//! strategy name and checks the dependency graph up front, so a bad strategy
//! reference fails at configuration time instead of mid-run.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::canon::{self, OWL_SAME_AS};
use crate::error::{ConfigError, FuseResult};
use crate::executor::ExecutorConfig;
use crate::extsort::SortConfig;
use crate::loader::LoaderConfig;
use crate::resolve::{Cardinality, PredicateStrategy, ScoringParams, StrategyKind, StrategyTable};
use crate::sink::{FederatedSink, FileSink, SplittingFileSink, StatementSink};
use crate::source::{FileSource, QuadSource, RetryConfig};

/// Result type for configuration handling.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

fn default_equivalence_predicates() -> Vec<String> {
    vec![OWL_SAME_AS.to_string()]
}

/// Top-level run configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FusionConfig {
    /// Parent directory for the run's temporary files. Defaults to the
    /// system temp directory.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Identifiers preferred as canonical representatives.
    #[serde(default)]
    pub preferred_uris: Vec<String>,

    /// Line-per-identifier file merged into the preferred set on load and
    /// rewritten with this run's emitted subjects on success.
    #[serde(default)]
    pub preferred_uris_file: Option<PathBuf>,

    /// Predicates whose objects are dependent sub-resources.
    #[serde(default)]
    pub description_predicates: Vec<String>,

    /// Predicates read as equivalence links.
    #[serde(default = "default_equivalence_predicates")]
    pub equivalence_predicates: Vec<String>,

    #[serde(default)]
    pub fusion: FusionSection,
    #[serde(default)]
    pub sort: SortSection,
    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub sources: Vec<SourceSpec>,
    #[serde(default)]
    pub equivalence_sources: Vec<SourceSpec>,
    #[serde(default)]
    pub sinks: Vec<SinkSpec>,
    #[serde(default)]
    pub strategies: Vec<StrategySpec>,

    /// Per-source trust scores, keyed by named graph.
    #[serde(default)]
    pub trust: HashMap<String, f64>,
    /// Publisher reputation, keyed by named graph.
    #[serde(default)]
    pub publishers: HashMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FusionSection {
    pub default_strategy: String,
    pub agree_coefficient: f64,
    pub unknown_trust: f64,
    pub publisher_score_weight: f64,
    pub max_date_diff_days: f64,
    pub output_mapped_subjects_only: bool,
    /// Zero means unlimited.
    pub max_output_statements: u64,
}

impl Default for FusionSection {
    fn default() -> Self {
        Self {
            default_strategy: "keep-all".to_string(),
            agree_coefficient: 2.0,
            unknown_trust: 0.5,
            publisher_score_weight: 0.0,
            max_date_diff_days: 365.0,
            output_mapped_subjects_only: false,
            max_output_statements: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SortSection {
    /// Zero or negative means unbounded (single in-memory sort).
    pub memory_limit_bytes: i64,
    pub compress: bool,
}

impl Default for SortSection {
    fn default() -> Self {
        let d = SortConfig::default();
        Self {
            memory_limit_bytes: d.memory_limit_bytes,
            compress: d.compress,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetrySection {
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        let d = RetryConfig::default();
        Self {
            attempts: d.attempts,
            backoff_ms: d.backoff.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSpec {
    pub path: PathBuf,
    /// Named graph for quads without an explicit context. Defaults to a
    /// `file://` IRI derived from the path.
    #[serde(default)]
    pub default_context: Option<String>,
}

impl SourceSpec {
    fn context(&self) -> String {
        self.default_context
            .clone()
            .unwrap_or_else(|| format!("file://{}", self.path.display()))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SinkSpec {
    pub path: PathBuf,
    /// Roll to a numbered sibling once this many bytes are written.
    /// Zero disables splitting.
    #[serde(default)]
    pub split_bytes: u64,
    /// Emit quality/provenance comment lines alongside each statement.
    #[serde(default)]
    pub annotate: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategySpec {
    pub predicate: String,
    pub strategy: String,
    #[serde(default)]
    pub cardinality: Option<CardinalitySpec>,
    #[serde(default)]
    pub depends_on: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CardinalitySpec {
    Single,
    Many,
}

impl From<CardinalitySpec> for Cardinality {
    fn from(spec: CardinalitySpec) -> Self {
        match spec {
            CardinalitySpec::Single => Cardinality::SingleValued,
            CardinalitySpec::Many => Cardinality::ManyValued,
        }
    }
}

impl FusionConfig {
    /// Read and parse a config file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, path)
    }

    /// Parse config text. `origin` only labels parse errors.
    pub fn from_toml(text: &str, origin: &Path) -> ConfigResult<Self> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Resolve strategy names, check the dependency DAG, and sanity-check
    /// numeric ranges. Everything here fails at configuration time.
    pub fn validate(&self) -> ConfigResult<()> {
        let table = self.strategy_table()?;
        table.validate()?;

        let invalid = |message: String, hint: &str| ConfigError::Invalid {
            message,
            hint: hint.to_string(),
        };
        let f = &self.fusion;
        if !(0.0..=1.0).contains(&f.unknown_trust) {
            return Err(invalid(
                format!("unknown_trust must be in [0, 1], got {}", f.unknown_trust),
                "Trust scores are probabilities.",
            ));
        }
        if !(0.0..=1.0).contains(&f.publisher_score_weight) {
            return Err(invalid(
                format!(
                    "publisher_score_weight must be in [0, 1], got {}",
                    f.publisher_score_weight
                ),
                "The publisher term is a convex blend with the agreement term.",
            ));
        }
        if f.agree_coefficient < 0.0 {
            return Err(invalid(
                format!("agree_coefficient must be >= 0, got {}", f.agree_coefficient),
                "Use 0 to saturate on any corroboration.",
            ));
        }
        if f.max_date_diff_days <= 0.0 {
            return Err(invalid(
                format!("max_date_diff_days must be > 0, got {}", f.max_date_diff_days),
                "The date-consistency decay is normalized by this constant.",
            ));
        }
        for (graph, score) in self.trust.iter().chain(self.publishers.iter()) {
            if !(0.0..=1.0).contains(score) {
                return Err(invalid(
                    format!("score for graph {graph} must be in [0, 1], got {score}"),
                    "Trust and publisher scores are probabilities.",
                ));
            }
        }
        if self.sinks.is_empty() {
            return Err(invalid(
                "at least one sink is required".to_string(),
                "Add a [[sinks]] table with a `path`.",
            ));
        }
        Ok(())
    }

    /// Build the per-predicate strategy table. Unknown strategy names are
    /// rejected here.
    pub fn strategy_table(&self) -> ConfigResult<StrategyTable> {
        let default = StrategyKind::parse(&self.fusion.default_strategy)?;
        let mut table = StrategyTable::new(default);
        for spec in &self.strategies {
            let kind = StrategyKind::parse(&spec.strategy)?;
            let mut strategy = PredicateStrategy::new(kind);
            if let Some(cardinality) = spec.cardinality {
                strategy.cardinality = cardinality.into();
            }
            if let Some(dep) = &spec.depends_on {
                strategy = strategy.with_dependency(dep.clone());
            }
            table.insert(spec.predicate.clone(), strategy);
        }
        Ok(table)
    }

    pub fn scoring(&self) -> ScoringParams {
        ScoringParams {
            agree_coefficient: self.fusion.agree_coefficient,
            unknown_trust: self.fusion.unknown_trust,
            publisher_weight: self.fusion.publisher_score_weight,
            max_date_diff_days: self.fusion.max_date_diff_days,
            source_trust: self.trust.clone(),
            publisher_score: self.publishers.clone(),
        }
    }

    pub fn sort_config(&self) -> SortConfig {
        SortConfig {
            memory_limit_bytes: self.sort.memory_limit_bytes,
            compress: self.sort.compress,
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            attempts: self.retry.attempts,
            backoff: std::time::Duration::from_millis(self.retry.backoff_ms),
        }
    }

    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            description_predicates: self.description_predicate_set(),
            output_mapped_subjects_only: self.fusion.output_mapped_subjects_only,
            sort: self.sort_config(),
            retry: self.retry_config(),
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_output_statements: self.fusion.max_output_statements,
            canonical_output: self.preferred_uris_file.clone(),
        }
    }

    pub fn description_predicate_set(&self) -> BTreeSet<String> {
        self.description_predicates.iter().cloned().collect()
    }

    pub fn equivalence_predicate_set(&self) -> BTreeSet<String> {
        self.equivalence_predicates.iter().cloned().collect()
    }

    /// The preferred-identifier set: configured entries plus the persisted
    /// output of a prior run (missing file tolerated).
    pub fn preferred_set(&self) -> FuseResult<BTreeSet<String>> {
        let mut set: BTreeSet<String> = self.preferred_uris.iter().cloned().collect();
        if let Some(path) = &self.preferred_uris_file {
            set.extend(canon::load_uri_set(path)?);
        }
        Ok(set)
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn build_sources(&self) -> Vec<Box<dyn QuadSource>> {
        self.sources
            .iter()
            .map(|s| Box::new(FileSource::new(&s.path, s.context())) as Box<dyn QuadSource>)
            .collect()
    }

    pub fn build_equivalence_sources(&self) -> Vec<Box<dyn QuadSource>> {
        self.equivalence_sources
            .iter()
            .map(|s| Box::new(FileSource::new(&s.path, s.context())) as Box<dyn QuadSource>)
            .collect()
    }

    /// Build the output sink; multiple sinks are federated.
    pub fn build_sink(&self) -> FuseResult<Box<dyn StatementSink>> {
        let mut sinks: Vec<Box<dyn StatementSink>> = Vec::with_capacity(self.sinks.len());
        for spec in &self.sinks {
            let sink: Box<dyn StatementSink> = if spec.split_bytes > 0 {
                Box::new(SplittingFileSink::create(
                    &spec.path,
                    spec.split_bytes,
                    spec.annotate,
                )?)
            } else {
                Box::new(FileSink::create(&spec.path, spec.annotate)?)
            };
            sinks.push(sink);
        }
        if sinks.len() == 1 {
            Ok(sinks.pop().expect("one sink"))
        } else {
            Ok(Box::new(FederatedSink::new(sinks)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [[sources]]
        path = "data.nq"

        [[sinks]]
        path = "out.nt"
    "#;

    fn parse(text: &str) -> FusionConfig {
        FusionConfig::from_toml(text, Path::new("test.toml")).unwrap()
    }

    #[test]
    fn minimal_config_validates_with_defaults() {
        let config = parse(MINIMAL);
        config.validate().unwrap();
        assert_eq!(config.fusion.default_strategy, "keep-all");
        assert_eq!(config.fusion.max_output_statements, 0);
        assert_eq!(config.equivalence_predicates, vec![OWL_SAME_AS.to_string()]);
    }

    #[test]
    fn unknown_strategy_fails_at_validation_time() {
        let config = parse(
            r#"
            [[sources]]
            path = "data.nq"

            [[sinks]]
            path = "out.nt"

            [[strategies]]
            predicate = "http://p"
            strategy = "majority-vote"
        "#,
        );
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Strategy(_)));
    }

    #[test]
    fn dependency_cycle_fails_at_validation_time() {
        let config = parse(
            r#"
            [[sources]]
            path = "data.nq"

            [[sinks]]
            path = "out.nt"

            [[strategies]]
            predicate = "http://a"
            strategy = "keep-best"
            depends_on = "http://b"

            [[strategies]]
            predicate = "http://b"
            strategy = "keep-best"
            depends_on = "http://a"
        "#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_trust_is_rejected() {
        let config = parse(
            r#"
            [[sources]]
            path = "data.nq"

            [[sinks]]
            path = "out.nt"

            [trust]
            "http://g" = 1.5
        "#,
        );
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn missing_sink_is_rejected() {
        let config = parse(
            r#"
            [[sources]]
            path = "data.nq"
        "#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn strategy_table_reflects_specs() {
        let config = parse(
            r#"
            [[sources]]
            path = "data.nq"

            [[sinks]]
            path = "out.nt"

            [[strategies]]
            predicate = "http://label"
            strategy = "keep-best"
            cardinality = "single"
            depends_on = "http://type"
        "#,
        );
        let table = config.strategy_table().unwrap();
        let s = table.lookup("http://label");
        assert_eq!(s.kind, StrategyKind::KeepBest);
        assert_eq!(s.cardinality, Cardinality::SingleValued);
        assert_eq!(s.depends_on.as_deref(), Some("http://type"));
    }

    #[test]
    fn source_context_defaults_to_file_iri() {
        let config = parse(MINIMAL);
        assert_eq!(config.sources[0].context(), "file://data.nq");
    }

    #[test]
    fn unknown_toml_keys_are_rejected() {
        let err =
            FusionConfig::from_toml("unknown_key = 1", Path::new("test.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}

//! Resolution strategies and the per-predicate strategy table.
//!
//! Each predicate (or the configured default) maps to a named resolution
//! function and a cardinality. A strategy may declare that it depends on
//! another predicate's resolution; the dependency graph is a small DAG and
//! clusters are resolved in a topological order computed per resource from
//! the predicates actually present.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::error::ResolveError;

/// Result type for strategy operations.
pub type ResolveResult<T> = std::result::Result<T, ResolveError>;

/// How many values a predicate may carry after resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    SingleValued,
    ManyValued,
}

/// Named resolution functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Keep every distinct value (many-valued, no reduction).
    KeepAll,
    /// Keep the single highest-quality value.
    KeepBest,
}

impl StrategyKind {
    /// Resolve a configured strategy name. Unknown names are a configuration
    /// error, raised at validation time rather than mid-run.
    pub fn parse(name: &str) -> ResolveResult<Self> {
        match name {
            "keep-all" => Ok(StrategyKind::KeepAll),
            "keep-best" => Ok(StrategyKind::KeepBest),
            _ => Err(ResolveError::UnknownStrategy {
                name: name.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::KeepAll => "keep-all",
            StrategyKind::KeepBest => "keep-best",
        }
    }

    pub fn default_cardinality(&self) -> Cardinality {
        match self {
            StrategyKind::KeepAll => Cardinality::ManyValued,
            StrategyKind::KeepBest => Cardinality::SingleValued,
        }
    }
}

/// One predicate's resolution settings.
#[derive(Debug, Clone)]
pub struct PredicateStrategy {
    pub kind: StrategyKind,
    pub cardinality: Cardinality,
    /// Predicate that must be resolved before this one, within the same
    /// resource.
    pub depends_on: Option<String>,
}

impl PredicateStrategy {
    pub fn new(kind: StrategyKind) -> Self {
        Self {
            kind,
            cardinality: kind.default_cardinality(),
            depends_on: None,
        }
    }

    pub fn with_dependency(mut self, predicate: impl Into<String>) -> Self {
        self.depends_on = Some(predicate.into());
        self
    }
}

/// Per-predicate strategies plus the fallback default.
#[derive(Debug, Clone)]
pub struct StrategyTable {
    default: PredicateStrategy,
    per_predicate: HashMap<String, PredicateStrategy>,
}

impl StrategyTable {
    pub fn new(default: StrategyKind) -> Self {
        Self {
            default: PredicateStrategy::new(default),
            per_predicate: HashMap::new(),
        }
    }

    pub fn insert(&mut self, predicate: impl Into<String>, strategy: PredicateStrategy) {
        self.per_predicate.insert(predicate.into(), strategy);
    }

    /// The strategy governing `predicate`.
    pub fn lookup(&self, predicate: &str) -> &PredicateStrategy {
        self.per_predicate.get(predicate).unwrap_or(&self.default)
    }

    /// Reject dependency cycles across the whole configured table. Run once
    /// at configuration-validation time.
    pub fn validate(&self) -> ResolveResult<()> {
        let mut all: Vec<&str> = self.per_predicate.keys().map(String::as_str).collect();
        all.sort_unstable();
        self.resolution_order(all).map(|_| ())
    }

    /// Topological resolution order for the predicates present in one
    /// resource: every dependency sorts before its dependent. Deterministic
    /// for a given (sorted) input.
    pub fn resolution_order<'a>(
        &self,
        present: impl IntoIterator<Item = &'a str>,
    ) -> ResolveResult<Vec<&'a str>> {
        let present: Vec<&'a str> = present.into_iter().collect();
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for &p in &present {
            graph.add_node(p);
        }
        for &p in &present {
            if let Some(dep) = self.lookup(p).depends_on.as_deref() {
                // Dependencies on absent predicates impose no ordering.
                if graph.contains_node(dep) {
                    graph.add_edge(dep, p, ());
                }
            }
        }
        match toposort(&graph, None) {
            Ok(order) => {
                // Graph nodes may borrow from the table; hand back the
                // caller's own references instead.
                let by_content: HashMap<&str, &'a str> =
                    present.iter().map(|&p| (p, p)).collect();
                Ok(order.into_iter().map(|n| by_content[n]).collect())
            }
            Err(cycle) => Err(ResolveError::DependencyCycle {
                predicate: cycle.node_id().to_string(),
            }),
        }
    }
}

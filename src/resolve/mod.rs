//! Conflict resolution engine.
//!
//! Consumes one [`ResourceDescription`] at a time, partitions its quads into
//! one conflict cluster per canonical predicate, deduplicates identical
//! candidates (merging provenance), resolves clusters in strategy-dependency
//! order, and emits quality-scored [`ResolvedStatement`]s.
//!
//! Dependent sub-resources (pulled in by the loader via description-linking
//! predicates) are assigned freshly synthesized identifiers and resolved
//! recursively; the owning link carries the mean quality of the dependent's
//! resolved statements and the union of contributing source graphs.
//!
//! The engine is stateless between descriptions: it holds only borrowed
//! configuration and the run-scoped synthesized-identifier generator.

pub mod quality;
pub mod strategy;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

use crate::error::FuseResult;
use crate::model::{Quad, ResolvedStatement, ResourceDescription, Term, subject_key, subject_term};

pub use quality::ScoringParams;
pub use strategy::{Cardinality, PredicateStrategy, StrategyKind, StrategyTable};

// ---------------------------------------------------------------------------
// Conflict clusters
// ---------------------------------------------------------------------------

/// One candidate value with its merged provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub object: Term,
    pub graphs: BTreeSet<String>,
}

/// The candidate values competing for one (subject, predicate) pair.
#[derive(Debug, Clone)]
pub struct ConflictCluster {
    pub predicate: String,
    pub candidates: Vec<Candidate>,
}

/// Group quads by canonical predicate and deduplicate identical objects,
/// taking the union of their source graphs.
pub fn partition(quads: &[Quad]) -> Vec<ConflictCluster> {
    let mut by_predicate: BTreeMap<&str, Vec<Candidate>> = BTreeMap::new();
    for quad in quads {
        let Some(predicate) = quad.predicate.as_iri() else {
            tracing::warn!(term = %quad.predicate, "skipping quad with non-IRI predicate");
            continue;
        };
        let candidates = by_predicate.entry(predicate).or_default();
        match candidates.iter_mut().find(|c| c.object == quad.object) {
            Some(existing) => {
                existing.graphs.insert(quad.graph.clone());
            }
            None => candidates.push(Candidate {
                object: quad.object.clone(),
                graphs: BTreeSet::from([quad.graph.clone()]),
            }),
        }
    }
    by_predicate
        .into_iter()
        .map(|(predicate, candidates)| ConflictCluster {
            predicate: predicate.to_string(),
            candidates,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Synthesized identifiers
// ---------------------------------------------------------------------------

/// Mints unique identifiers for resolved dependent resources.
///
/// Identifiers are minted under a fixed URN namespace with a per-run random
/// salt and a monotonically increasing counter, so they are never reused
/// within a run and never collide with a prior run's output.
#[derive(Debug)]
pub struct SyntheticIds {
    salt: String,
    counter: AtomicU64,
}

impl SyntheticIds {
    pub fn new() -> Self {
        let salt: u32 = rand::thread_rng().r#gen();
        Self::with_salt(format!("{salt:08x}"))
    }

    /// Fixed salt, for reproducible tests.
    pub fn with_salt(salt: impl Into<String>) -> Self {
        Self {
            salt: salt.into(),
            counter: AtomicU64::new(0),
        }
    }

    /// Mint the next identifier.
    pub fn mint(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("urn:fused:{}:{n}", self.salt)
    }

    /// Identifiers minted so far.
    pub fn minted(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

impl Default for SyntheticIds {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Resolves one resource description at a time into output statements.
pub struct ResolutionEngine<'a> {
    strategies: &'a StrategyTable,
    scoring: &'a ScoringParams,
    /// Predicates whose objects are dependent sub-resources.
    description_predicates: &'a BTreeSet<String>,
    ids: &'a SyntheticIds,
}

impl<'a> ResolutionEngine<'a> {
    pub fn new(
        strategies: &'a StrategyTable,
        scoring: &'a ScoringParams,
        description_predicates: &'a BTreeSet<String>,
        ids: &'a SyntheticIds,
    ) -> Self {
        Self {
            strategies,
            scoring,
            description_predicates,
            ids,
        }
    }

    /// Resolve a full description into statements, dependent resources
    /// included.
    pub fn resolve(&self, description: &ResourceDescription) -> FuseResult<Vec<ResolvedStatement>> {
        let owner = subject_term(&description.subject);
        let mut output = Vec::new();
        let mut in_flight = HashSet::new();
        in_flight.insert(description.subject.clone());
        self.resolve_quads(
            &owner,
            &description.quads,
            &description.dependent,
            &mut in_flight,
            &mut output,
        )?;
        Ok(output)
    }

    fn resolve_quads(
        &self,
        owner: &Term,
        quads: &[Quad],
        dependent_pool: &[Quad],
        in_flight: &mut HashSet<String>,
        output: &mut Vec<ResolvedStatement>,
    ) -> FuseResult<()> {
        let clusters = partition(quads);
        let present: Vec<&str> = clusters.iter().map(|c| c.predicate.as_str()).collect();
        let order = self.strategies.resolution_order(present)?;
        let mut by_predicate: BTreeMap<&str, &ConflictCluster> = clusters
            .iter()
            .map(|c| (c.predicate.as_str(), c))
            .collect();

        for predicate in order {
            let cluster = by_predicate.remove(predicate).expect("present predicate");
            if self.description_predicates.contains(predicate) {
                self.resolve_dependent_cluster(owner, cluster, dependent_pool, in_flight, output)?;
            } else {
                self.resolve_value_cluster(owner, cluster, output);
            }
        }
        Ok(())
    }

    /// Resolve a cluster of plain values with its configured strategy.
    fn resolve_value_cluster(
        &self,
        owner: &Term,
        cluster: &ConflictCluster,
        output: &mut Vec<ResolvedStatement>,
    ) {
        let predicate = Term::iri(cluster.predicate.clone());
        let scored: Vec<(f64, &Candidate)> = cluster
            .candidates
            .iter()
            .map(|c| (self.score(c, cluster), c))
            .collect();

        match self.strategies.lookup(&cluster.predicate).kind {
            StrategyKind::KeepAll => {
                for (quality, candidate) in scored {
                    output.push(ResolvedStatement::new(
                        owner.clone(),
                        predicate.clone(),
                        candidate.object.clone(),
                        quality,
                        candidate.graphs.clone(),
                    ));
                }
            }
            StrategyKind::KeepBest => {
                // Highest quality wins; ties break on the smallest object
                // serialization so the choice is stable across runs.
                let best = scored.iter().max_by(|(qa, ca), (qb, cb)| {
                    qa.total_cmp(qb)
                        .then_with(|| cb.object.to_string().cmp(&ca.object.to_string()))
                });
                if let Some((quality, candidate)) = best {
                    output.push(ResolvedStatement::new(
                        owner.clone(),
                        predicate,
                        candidate.object.clone(),
                        *quality,
                        candidate.graphs.clone(),
                    ));
                }
            }
        }
    }

    /// Quality of one candidate within its cluster.
    fn score(&self, candidate: &Candidate, cluster: &ConflictCluster) -> f64 {
        let base = self.scoring.base_quality(&candidate.graphs);
        let Some(date) = quality::parse_date(&candidate.object) else {
            return base;
        };
        let rivals: Vec<_> = cluster
            .candidates
            .iter()
            .filter(|c| c.object != candidate.object)
            .filter_map(|c| quality::parse_date(&c.object))
            .collect();
        let consistency = self.scoring.date_consistency(date, &rivals);
        self.scoring.apply_date_consistency(base, consistency)
    }

    /// Resolve a description-linking cluster: recurse into each dependent
    /// resource under a synthesized identifier.
    fn resolve_dependent_cluster(
        &self,
        owner: &Term,
        cluster: &ConflictCluster,
        dependent_pool: &[Quad],
        in_flight: &mut HashSet<String>,
        output: &mut Vec<ResolvedStatement>,
    ) -> FuseResult<()> {
        let predicate = Term::iri(cluster.predicate.clone());
        for candidate in &cluster.candidates {
            let key = subject_key(&candidate.object);
            let sub_quads: Vec<Quad> = match &key {
                Some(key) => dependent_pool
                    .iter()
                    .filter(|q| subject_key(&q.subject).as_deref() == Some(key))
                    .cloned()
                    .collect(),
                None => Vec::new(),
            };

            // No attached description, or a cyclic link back into a resource
            // currently being resolved: emit the link as a plain value.
            let cycle = key.as_ref().is_some_and(|k| in_flight.contains(k));
            if sub_quads.is_empty() || cycle {
                output.push(ResolvedStatement::new(
                    owner.clone(),
                    predicate.clone(),
                    candidate.object.clone(),
                    self.score(candidate, cluster),
                    candidate.graphs.clone(),
                ));
                continue;
            }
            let key = key.expect("resource candidate");

            let minted = Term::iri(self.ids.mint());
            in_flight.insert(key.clone());
            let mut sub_output = Vec::new();
            self.resolve_quads(&minted, &sub_quads, dependent_pool, in_flight, &mut sub_output)?;
            in_flight.remove(&key);

            // Aggregate quality: mean over the dependent's resolved
            // statements. Provenance: union of constituents plus the link's
            // own sources.
            let mut provenance = candidate.graphs.clone();
            let quality = if sub_output.is_empty() {
                self.scoring.base_quality(&candidate.graphs)
            } else {
                let sum: f64 = sub_output.iter().map(|s| s.quality).sum();
                for s in &sub_output {
                    provenance.extend(s.provenance.iter().cloned());
                }
                (sum / sub_output.len() as f64).clamp(0.0, 1.0)
            };

            output.push(ResolvedStatement::new(
                owner.clone(),
                predicate.clone(),
                minted,
                quality,
                provenance,
            ));
            output.append(&mut sub_output);
        }
        Ok(())
    }
}

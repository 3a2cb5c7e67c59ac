//! Quality scoring for candidate values.
//!
//! The score of a candidate blends three inputs:
//!
//! - **per-source trust** — configured per named graph, with a configured
//!   default for unknown sources;
//! - **agreement** — independent sources asserting the exact same value pull
//!   the score toward 1 along a saturating curve: with agree coefficient `N`,
//!   a candidate's score is its best source's trust plus a bonus that
//!   saturates once the remaining sources' trust sums to `N`, so `N + 1`
//!   perfectly-trusted agreeing sources reach exactly 1;
//! - **publisher reputation** — the best publisher score over the candidate's
//!   provenance, blended in with a configured weight.
//!
//! A lone source therefore scores exactly its own trust, and adding an
//! agreeing source never lowers the result.
//!
//! Date-valued candidates additionally take a consistency adjustment that
//! decays with the absolute difference between rival candidate dates,
//! normalized by a configured maximum.

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;

use crate::model::Term;

const XSD_DATE: &str = "http://www.w3.org/2001/XMLSchema#date";
const XSD_DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";

/// Tuning constants and per-graph scores for the quality formula.
#[derive(Debug, Clone)]
pub struct ScoringParams {
    /// Agree coefficient `N`: trust mass beyond the best source needed to
    /// saturate the agreement bonus.
    pub agree_coefficient: f64,
    /// Trust substituted for sources with no configured score.
    pub unknown_trust: f64,
    /// Weight of the publisher-reputation term in `[0, 1]`.
    pub publisher_weight: f64,
    /// Normalization constant for the date-consistency decay, in days.
    pub max_date_diff_days: f64,
    /// Per-source trust, keyed by named graph.
    pub source_trust: HashMap<String, f64>,
    /// Publisher reputation, keyed by named graph.
    pub publisher_score: HashMap<String, f64>,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            agree_coefficient: 2.0,
            unknown_trust: 0.5,
            publisher_weight: 0.0,
            max_date_diff_days: 365.0,
            source_trust: HashMap::new(),
            publisher_score: HashMap::new(),
        }
    }
}

impl ScoringParams {
    /// Trust score of one named graph.
    pub fn trust(&self, graph: &str) -> f64 {
        self.source_trust
            .get(graph)
            .copied()
            .unwrap_or(self.unknown_trust)
            .clamp(0.0, 1.0)
    }

    /// Publisher reputation of one named graph.
    pub fn publisher(&self, graph: &str) -> f64 {
        self.publisher_score
            .get(graph)
            .copied()
            .unwrap_or(self.unknown_trust)
            .clamp(0.0, 1.0)
    }

    /// Agreement score over the sources asserting one candidate value.
    pub fn agreement(&self, graphs: &BTreeSet<String>) -> f64 {
        let trusts: Vec<f64> = graphs.iter().map(|g| self.trust(g)).collect();
        let Some(best) = trusts.iter().copied().fold(None::<f64>, |acc, t| {
            Some(acc.map_or(t, |a| a.max(t)))
        }) else {
            return 0.0;
        };
        let extra: f64 = trusts.iter().sum::<f64>() - best;
        let bonus = if self.agree_coefficient > 0.0 {
            (extra / self.agree_coefficient).min(1.0)
        } else if extra > 0.0 {
            1.0
        } else {
            0.0
        };
        best + (1.0 - best) * bonus
    }

    /// Agreement blended with the publisher term, clamped to `[0, 1]`.
    pub fn base_quality(&self, graphs: &BTreeSet<String>) -> f64 {
        let agreement = self.agreement(graphs);
        let w = self.publisher_weight.clamp(0.0, 1.0);
        if w == 0.0 {
            return agreement.clamp(0.0, 1.0);
        }
        // Best publisher over the provenance keeps corroboration monotone.
        let publisher = graphs
            .iter()
            .map(|g| self.publisher(g))
            .fold(0.0f64, f64::max);
        ((1.0 - w) * agreement + w * publisher).clamp(0.0, 1.0)
    }

    /// Consistency of one date against its rival candidates: mean of
    /// `1 - min(1, |Δdays| / max_date_diff_days)`. A candidate with no dated
    /// rivals is fully consistent.
    pub fn date_consistency(&self, date: NaiveDate, rivals: &[NaiveDate]) -> f64 {
        if rivals.is_empty() || self.max_date_diff_days <= 0.0 {
            return 1.0;
        }
        let sum: f64 = rivals
            .iter()
            .map(|r| {
                let diff = (date - *r).num_days().unsigned_abs() as f64;
                1.0 - (diff / self.max_date_diff_days).min(1.0)
            })
            .sum();
        sum / rivals.len() as f64
    }

    /// Fold the date-consistency adjustment into a quality score.
    pub fn apply_date_consistency(&self, quality: f64, consistency: f64) -> f64 {
        (quality * (1.0 + consistency) / 2.0).clamp(0.0, 1.0)
    }
}

/// Parse a date-valued literal: `xsd:date`, `xsd:dateTime`, or an untyped
/// ISO-8601 lexical form. Anything else is not date-valued.
pub fn parse_date(term: &Term) -> Option<NaiveDate> {
    let Term::Literal {
        lexical,
        datatype,
        lang: None,
    } = term
    else {
        return None;
    };
    match datatype.as_deref() {
        None | Some(XSD_DATE) | Some(XSD_DATE_TIME) => {}
        Some(_) => return None,
    }
    if let Ok(d) = NaiveDate::parse_from_str(lexical, "%Y-%m-%d") {
        return Some(d);
    }
    chrono::DateTime::parse_from_rfc3339(lexical)
        .ok()
        .map(|dt| dt.date_naive())
}

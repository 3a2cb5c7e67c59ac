//! End-to-end pipeline tests: sources → canonical mapping → external-sort
//! loader → conflict resolution → sink.
//!
//! Covers the named fusion scenarios plus the grouping, ordering, and
//! output-limit properties the pipeline guarantees.

use std::collections::BTreeSet;

use quadfuse::canon::{CanonicalUriMap, UriEquivalences};
use quadfuse::executor::{ExecutorConfig, FusionExecutor, FusionStats};
use quadfuse::loader::{ExternalSortLoader, LoaderConfig};
use quadfuse::model::{Quad, ResolvedStatement, Term};
use quadfuse::resolve::{ScoringParams, StrategyKind, StrategyTable, SyntheticIds};
use quadfuse::sink::VecSink;
use quadfuse::source::{MemorySource, QuadSource};

fn iri(s: &str) -> Term {
    Term::iri(s)
}

fn quad(s: &str, p: &str, o: Term, g: &str) -> Quad {
    Quad::new(iri(s), iri(p), o, g)
}

fn one_source(quads: Vec<Quad>) -> Vec<Box<dyn QuadSource>> {
    vec![Box::new(MemorySource::new("mem", "http://graphs/default", quads))]
}

struct Pipeline {
    canon: CanonicalUriMap,
    loader: LoaderConfig,
    strategies: StrategyTable,
    scoring: ScoringParams,
    description_predicates: BTreeSet<String>,
    executor: ExecutorConfig,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            canon: CanonicalUriMap::empty(),
            loader: LoaderConfig::default(),
            strategies: StrategyTable::new(StrategyKind::KeepAll),
            scoring: ScoringParams::default(),
            description_predicates: BTreeSet::new(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl Pipeline {
    fn run(self, sources: Vec<Box<dyn QuadSource>>) -> (FusionStats, Vec<ResolvedStatement>) {
        let dir = tempfile::tempdir().unwrap();
        let mut loader_config = self.loader;
        loader_config.description_predicates = self.description_predicates.clone();
        let descriptions =
            ExternalSortLoader::load(&sources, &self.canon, &loader_config, dir.path()).unwrap();
        let executor = FusionExecutor::new(
            self.strategies,
            self.scoring,
            self.description_predicates,
            self.executor,
        )
        .with_ids(SyntheticIds::with_salt("test"));
        let mut sink = VecSink::new();
        let stats = executor.run(descriptions, &mut sink).unwrap();
        (stats, sink.into_statements())
    }
}

fn provenance(statement: &ResolvedStatement) -> Vec<&str> {
    statement.provenance.iter().map(String::as_str).collect()
}

// ---------------------------------------------------------------------------
// Named scenarios
// ---------------------------------------------------------------------------

/// Two sources agree on the same value with no equivalence links: one
/// statement, merged provenance, agreement-boosted quality.
#[test]
fn scenario_a_two_source_agreement() {
    let sources = one_source(vec![
        quad("http://s1", "http://p1", Term::literal("o1"), "http://g1"),
        quad("http://s1", "http://p1", Term::literal("o1"), "http://g2"),
    ]);
    let (stats, statements) = Pipeline::default().run(sources);

    assert_eq!(stats.statements_written, 1);
    assert_eq!(statements.len(), 1);
    let s = &statements[0];
    assert_eq!(s.subject, iri("http://s1"));
    assert_eq!(s.object, Term::literal("o1"));
    assert_eq!(provenance(s), vec!["http://g1", "http://g2"]);

    // Two agreeing sources score above a lone one.
    let lone = Pipeline::default()
        .run(one_source(vec![quad(
            "http://s1",
            "http://p1",
            Term::literal("o1"),
            "http://g1",
        )]))
        .1[0]
        .quality;
    assert!(s.quality > lone);
}

/// An equivalence link with a preferred endpoint: both descriptions fuse
/// under the preferred subject.
#[test]
fn scenario_b_equivalence_with_preferred_subject() {
    let mut eq = UriEquivalences::new();
    eq.add_iri_pair("http://sa", "http://sb");
    // Without the preferred set, "http://sa" would win lexicographically
    // anyway; prefer it explicitly to pin the scenario.
    let preferred: BTreeSet<String> = ["http://sa".to_string()].into();
    let canon = eq.build(&preferred);

    let sources = one_source(vec![
        quad("http://sa", "http://p", Term::literal("o"), "http://ga"),
        quad("http://sb", "http://p", Term::literal("o"), "http://gb"),
    ]);
    let (_, statements) = Pipeline {
        canon,
        ..Default::default()
    }
    .run(sources);

    assert_eq!(statements.len(), 1);
    let s = &statements[0];
    assert_eq!(s.subject, iri("http://sa"));
    assert_eq!(provenance(s), vec!["http://ga", "http://gb"]);
}

/// Three sources disagree under keep-all: three statements, each carrying
/// only its own source's provenance and trust.
#[test]
fn scenario_c_three_way_disagreement_keep_all() {
    let scoring = ScoringParams {
        source_trust: [
            ("http://ga".to_string(), 0.9),
            ("http://gb".to_string(), 0.5),
            ("http://gc".to_string(), 0.2),
        ]
        .into_iter()
        .collect(),
        ..Default::default()
    };
    let sources = one_source(vec![
        quad("http://s", "http://p", Term::literal("o1"), "http://ga"),
        quad("http://s", "http://p", Term::literal("o2"), "http://gb"),
        quad("http://s", "http://p", Term::literal("o3"), "http://gc"),
    ]);
    let (_, statements) = Pipeline {
        scoring,
        ..Default::default()
    }
    .run(sources);

    assert_eq!(statements.len(), 3);
    let expectations = [
        ("o1", "http://ga", 0.9),
        ("o2", "http://gb", 0.5),
        ("o3", "http://gc", 0.2),
    ];
    for (value, graph, trust) in expectations {
        let s = statements
            .iter()
            .find(|s| s.object == Term::literal(value))
            .unwrap_or_else(|| panic!("missing statement for {value}"));
        assert_eq!(provenance(s), vec![graph]);
        assert!(
            (s.quality - trust).abs() < 1e-9,
            "quality for {value} should be its own source trust"
        );
    }
}

/// A ceiling of five over three two-statement resources stops the run after
/// the second whole resource.
#[test]
fn scenario_d_output_limit_stops_between_resources() {
    let mut quads = Vec::new();
    for s in ["http://r1", "http://r2", "http://r3"] {
        quads.push(quad(s, "http://p1", Term::literal("a"), "http://g"));
        quads.push(quad(s, "http://p2", Term::literal("b"), "http://g"));
    }
    let (stats, statements) = Pipeline {
        executor: ExecutorConfig {
            max_output_statements: 5,
            canonical_output: None,
        },
        ..Default::default()
    }
    .run(one_source(quads));

    assert_eq!(stats.statements_written, 4);
    assert_eq!(statements.len(), 4);
    assert!(stats.limit_reached);
    // No statement of the third resource leaked out.
    assert!(statements.iter().all(|s| s.subject != iri("http://r3")));
}

// ---------------------------------------------------------------------------
// Pipeline properties
// ---------------------------------------------------------------------------

/// Every input quad surfaces in the output of exactly one subject, and
/// subjects come out in ascending order.
#[test]
fn grouping_completeness_and_ordering() {
    let mut quads = Vec::new();
    for i in (0..20).rev() {
        quads.push(quad(
            &format!("http://s{i:02}"),
            "http://p",
            Term::literal(format!("v{i}")),
            "http://g",
        ));
    }
    let (stats, statements) = Pipeline::default().run(one_source(quads));

    assert_eq!(stats.descriptions, 20);
    assert_eq!(statements.len(), 20);

    let subjects: Vec<String> = statements
        .iter()
        .map(|s| s.subject.as_iri().unwrap().to_string())
        .collect();
    let mut sorted = subjects.clone();
    sorted.sort();
    assert_eq!(subjects, sorted, "descriptions must come out subject-ordered");

    for i in 0..20 {
        let value = Term::literal(format!("v{i}"));
        let owners: Vec<_> = statements.iter().filter(|s| s.object == value).collect();
        assert_eq!(owners.len(), 1, "value v{i} must appear exactly once");
        assert_eq!(owners[0].subject, iri(&format!("http://s{i:02}")));
    }
}

/// Adding an equally-trusted agreeing source never lowers quality, end to
/// end.
#[test]
fn quality_monotonicity_across_source_counts() {
    let mut previous = 0.0;
    for n in 1..=4 {
        let quads: Vec<Quad> = (0..n)
            .map(|i| {
                quad(
                    "http://s",
                    "http://p",
                    Term::literal("agreed"),
                    &format!("http://g{i}"),
                )
            })
            .collect();
        let (_, statements) = Pipeline::default().run(one_source(quads));
        let quality = statements[0].quality;
        assert!(
            quality >= previous,
            "quality dropped from {previous} to {quality} at {n} sources"
        );
        previous = quality;
    }
}

/// Dependent resources resolve under synthesized identifiers end to end,
/// and the owning link aggregates their quality and provenance.
#[test]
fn dependent_resources_inline_end_to_end() {
    let mut description_predicates = BTreeSet::new();
    description_predicates.insert("http://hasAddress".to_string());

    let sources = one_source(vec![
        quad("http://person", "http://name", Term::literal("Ada"), "http://g1"),
        quad("http://person", "http://hasAddress", iri("http://addr"), "http://g1"),
        quad("http://addr", "http://street", Term::literal("Main St"), "http://g2"),
        quad("http://addr", "http://city", Term::literal("Springfield"), "http://g3"),
    ]);
    let (stats, statements) = Pipeline {
        description_predicates,
        ..Default::default()
    }
    .run(sources);

    assert_eq!(stats.synthesized_ids, 1);

    let link = statements
        .iter()
        .find(|s| s.predicate == iri("http://hasAddress"))
        .unwrap();
    let minted = link.object.as_iri().unwrap();
    assert!(minted.starts_with("urn:fused:"));
    for g in ["http://g1", "http://g2", "http://g3"] {
        assert!(link.provenance.contains(g), "link must carry {g}");
    }

    let dependent: Vec<_> = statements
        .iter()
        .filter(|s| s.subject == iri(minted))
        .collect();
    assert_eq!(dependent.len(), 2);
    let mean =
        dependent.iter().map(|s| s.quality).sum::<f64>() / dependent.len() as f64;
    assert!((link.quality - mean).abs() < 1e-9);
}

/// Keep-best with a strategy dependency resolves in dependency order and
/// yields the single best value for the governed predicate.
#[test]
fn keep_best_with_dependency_resolves_single_value() {
    let mut strategies = StrategyTable::new(StrategyKind::KeepAll);
    strategies.insert(
        "http://label",
        quadfuse::resolve::PredicateStrategy::new(StrategyKind::KeepBest)
            .with_dependency("http://type"),
    );
    let scoring = ScoringParams {
        source_trust: [
            ("http://trusted".to_string(), 0.95),
            ("http://sketchy".to_string(), 0.1),
        ]
        .into_iter()
        .collect(),
        ..Default::default()
    };

    let sources = one_source(vec![
        quad("http://s", "http://type", iri("http://Person"), "http://trusted"),
        quad("http://s", "http://label", Term::literal("Right"), "http://trusted"),
        quad("http://s", "http://label", Term::literal("Wrong"), "http://sketchy"),
    ]);
    let (_, statements) = Pipeline {
        strategies,
        scoring,
        ..Default::default()
    }
    .run(sources);

    let labels: Vec<_> = statements
        .iter()
        .filter(|s| s.predicate == iri("http://label"))
        .collect();
    assert_eq!(labels.len(), 1);
    assert_eq!(labels[0].object, Term::literal("Right"));
}

/// The full pipeline over real files: gzip'd N-Quads source in, annotated
/// N-Triples out, all statements re-parseable by the codec.
#[test]
fn file_to_file_run_with_gzip_source() {
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join("input.nq.gz");
    let out_path = dir.path().join("fused.nt");

    let mut enc = GzEncoder::new(
        std::fs::File::create(&source_path).unwrap(),
        Compression::default(),
    );
    writeln!(enc, "<http://b> <http://p> \"two\" <http://g1> .").unwrap();
    writeln!(enc, "<http://a> <http://p> \"one\" <http://g1> .").unwrap();
    writeln!(enc, "<http://a> <http://p> \"one\" <http://g2> .").unwrap();
    enc.finish().unwrap();

    let sources: Vec<Box<dyn QuadSource>> = vec![Box::new(
        quadfuse::source::FileSource::new(&source_path, "http://default"),
    )];
    let descriptions = ExternalSortLoader::load(
        &sources,
        &CanonicalUriMap::empty(),
        &LoaderConfig::default(),
        dir.path(),
    )
    .unwrap();

    let executor = FusionExecutor::new(
        StrategyTable::new(StrategyKind::KeepAll),
        ScoringParams::default(),
        BTreeSet::new(),
        ExecutorConfig::default(),
    );
    let mut sink = quadfuse::sink::FileSink::create(&out_path, true).unwrap();
    let stats = executor.run(descriptions, &mut sink).unwrap();
    assert_eq!(stats.statements_written, 2);

    let mut reader = quadfuse::tuple::TupleReader::open(&out_path).unwrap();
    let mut parsed = 0;
    while let Some(tuple) = reader.next_tuple().unwrap() {
        assert_eq!(tuple.len(), 3);
        parsed += 1;
    }
    assert_eq!(parsed, 2);
}

/// Statements from several federated sources all land in one pass.
#[test]
fn multiple_sources_fuse_together() {
    let a: Vec<Box<dyn QuadSource>> = vec![
        Box::new(MemorySource::new(
            "left",
            "http://graphs/left",
            vec![quad("http://s", "http://p", Term::literal("v"), "http://graphs/left")],
        )),
        Box::new(MemorySource::new(
            "right",
            "http://graphs/right",
            vec![quad("http://s", "http://p", Term::literal("v"), "http://graphs/right")],
        )),
    ];
    let (_, statements) = Pipeline::default().run(a);
    assert_eq!(statements.len(), 1);
    assert_eq!(
        provenance(&statements[0]),
        vec!["http://graphs/left", "http://graphs/right"]
    );
}

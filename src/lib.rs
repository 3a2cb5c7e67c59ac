//! # quadfuse
//!
//! Fuses RDF-style quad data gathered from federated sources into a single
//! deduplicated, conflict-resolved dataset.
//!
//! ## Architecture
//!
//! - **Tuple codec** (`tuple`): line-oriented tuple files, optionally gzip'd
//! - **External sorter** (`extsort`): disk-spilling merge sort with k-way merge
//! - **Canonical mapping** (`canon`): `sameAs` equivalence classes with a
//!   deterministic preferred-representative rule
//! - **Input loader** (`loader`): copy → sort → merge-join → grouped
//!   resource-description stream, never holding the dataset in memory
//! - **Conflict resolution** (`resolve`): per-predicate clusters, strategy
//!   dispatch, quality scoring, synthesized identifiers for dependent resources
//! - **Executor** (`executor`): pull-resolve-write loop with a
//!   whole-description output ceiling
//!
//! ## Library usage
//!
//! ```no_run
//! use quadfuse::canon::CanonicalUriMap;
//! use quadfuse::executor::{ExecutorConfig, FusionExecutor};
//! use quadfuse::loader::{ExternalSortLoader, LoaderConfig};
//! use quadfuse::model::{Quad, Term};
//! use quadfuse::resolve::{ScoringParams, StrategyKind, StrategyTable};
//! use quadfuse::sink::VecSink;
//! use quadfuse::source::{MemorySource, QuadSource};
//!
//! let quads = vec![Quad::new(
//!     Term::iri("http://ex.org/s"),
//!     Term::iri("http://ex.org/p"),
//!     Term::literal("v"),
//!     "http://graphs/g1",
//! )];
//! let sources: Vec<Box<dyn QuadSource>> =
//!     vec![Box::new(MemorySource::new("mem", "http://graphs/g1", quads))];
//!
//! let descriptions = ExternalSortLoader::load(
//!     &sources,
//!     &CanonicalUriMap::empty(),
//!     &LoaderConfig::default(),
//!     std::env::temp_dir().as_path(),
//! )
//! .unwrap();
//!
//! let executor = FusionExecutor::new(
//!     StrategyTable::new(StrategyKind::KeepAll),
//!     ScoringParams::default(),
//!     Default::default(),
//!     ExecutorConfig::default(),
//! );
//! let mut sink = VecSink::new();
//! let stats = executor.run(descriptions, &mut sink).unwrap();
//! println!("{stats}");
//! ```

pub mod canon;
pub mod config;
pub mod error;
pub mod executor;
pub mod extsort;
pub mod loader;
pub mod model;
pub mod resolve;
pub mod sink;
pub mod source;
pub mod tuple;

//! Quad sources: where input statements come from.
//!
//! A [`QuadSource`] streams every quad it holds into a callback handler and
//! names the default context substituted for quads that arrive without one.
//! File-backed sources parse N-Quads-style lines through the tuple codec
//! (gzip'd files included); [`MemorySource`] backs tests and embedding.
//!
//! Transient source failures are retried a bounded number of times with a
//! fixed backoff via [`load_with_retry`] before escalating.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{FuseError, FuseResult, SourceError, TupleError};
use crate::model::{Quad, Term};
use crate::tuple::TupleReader;

/// Callback receiving each quad as it is read.
pub type QuadHandler<'a> = dyn FnMut(Quad) -> FuseResult<()> + 'a;

/// A federated input source of quads.
pub trait QuadSource {
    /// Identifier used in logs and error messages.
    fn name(&self) -> &str;

    /// Named graph assigned to quads that carry no explicit context.
    fn default_context(&self) -> &str;

    /// Stream every quad into `handler`. The source owns any connection or
    /// file handle for the duration of the call and releases it on return.
    fn load_all_quads(&self, handler: &mut QuadHandler<'_>) -> FuseResult<()>;
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Bounded retry with fixed backoff for transient source failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts (1 = no retry).
    pub attempts: u32,
    /// Fixed pause between attempts.
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Drive `source.load_all_quads`, retrying source-side failures.
///
/// Only source errors are retried; a handler-side failure (e.g. a temp-file
/// write error) aborts immediately. Quads delivered by a partially-failed
/// attempt may be delivered again on retry — downstream deduplication
/// collapses them, since identical (object, graph) candidates merge.
pub fn load_with_retry(
    source: &dyn QuadSource,
    retry: &RetryConfig,
    handler: &mut QuadHandler<'_>,
) -> FuseResult<()> {
    let attempts = retry.attempts.max(1);
    let mut last_message = String::new();
    for attempt in 1..=attempts {
        match source.load_all_quads(handler) {
            Ok(()) => return Ok(()),
            Err(FuseError::Source(err)) => {
                last_message = err.to_string();
                tracing::warn!(
                    source = source.name(),
                    attempt,
                    attempts,
                    error = %err,
                    "source load attempt failed"
                );
                if attempt < attempts {
                    std::thread::sleep(retry.backoff);
                }
            }
            Err(other) => return Err(other),
        }
    }
    Err(SourceError::LoadFailed {
        name: source.name().to_string(),
        attempts,
        message: last_message,
    }
    .into())
}

// ---------------------------------------------------------------------------
// File source
// ---------------------------------------------------------------------------

/// Quads read from an N-Quads-style file (optionally gzip'd).
///
/// Three-term lines take the source's default context; four-term lines carry
/// their graph as a fourth IRI term.
pub struct FileSource {
    name: String,
    path: PathBuf,
    default_context: String,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, default_context: impl Into<String>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            name,
            path,
            default_context: default_context.into(),
        }
    }

    fn parse_err(&self, source: TupleError) -> FuseError {
        SourceError::Parse {
            name: self.name.clone(),
            source,
        }
        .into()
    }

    fn shape_err(&self, line: u64, reason: &str) -> FuseError {
        self.parse_err(TupleError::Malformed {
            line,
            reason: reason.to_string(),
        })
    }
}

impl QuadSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_context(&self) -> &str {
        &self.default_context
    }

    fn load_all_quads(&self, handler: &mut QuadHandler<'_>) -> FuseResult<()> {
        let mut reader = TupleReader::open(&self.path).map_err(|e| self.parse_err(e))?;
        let mut line = 0u64;
        let mut count = 0u64;
        loop {
            let Some(terms) = reader.next_tuple().map_err(|e| self.parse_err(e))? else {
                break;
            };
            line += 1;
            let mut terms = terms.into_iter();
            let (subject, predicate, object) =
                match (terms.next(), terms.next(), terms.next()) {
                    (Some(s), Some(p), Some(o)) => (s, p, o),
                    _ => return Err(self.shape_err(line, "expected 3 or 4 terms")),
                };
            if !subject.is_resource() {
                return Err(self.shape_err(line, "subject must be an IRI or blank node"));
            }
            if !predicate.is_iri() {
                return Err(self.shape_err(line, "predicate must be an IRI"));
            }
            let graph = match terms.next() {
                None => self.default_context.clone(),
                Some(Term::Iri(g)) => g,
                Some(_) => return Err(self.shape_err(line, "graph must be an IRI")),
            };
            if terms.next().is_some() {
                return Err(self.shape_err(line, "expected 3 or 4 terms"));
            }
            handler(Quad::new(subject, predicate, object, graph))?;
            count += 1;
        }
        tracing::debug!(source = %self.name, quads = count, "source drained");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Memory source
// ---------------------------------------------------------------------------

/// In-memory quad source for tests and embedding.
pub struct MemorySource {
    name: String,
    default_context: String,
    quads: Vec<Quad>,
}

impl MemorySource {
    pub fn new(
        name: impl Into<String>,
        default_context: impl Into<String>,
        quads: Vec<Quad>,
    ) -> Self {
        Self {
            name: name.into(),
            default_context: default_context.into(),
            quads,
        }
    }
}

impl QuadSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_context(&self) -> &str {
        &self.default_context
    }

    fn load_all_quads(&self, handler: &mut QuadHandler<'_>) -> FuseResult<()> {
        for quad in &self.quads {
            handler(quad.clone())?;
        }
        Ok(())
    }
}

//! Statement sinks: where resolved output goes.
//!
//! [`FileSink`] writes N-Triples lines (gzip'd when the path says so), with
//! registered namespaces and optional per-statement quality/provenance
//! annotations emitted as `#` comment lines so the output stays readable by
//! the tuple codec. [`SplittingFileSink`] rolls over to a numbered sibling
//! file once a byte threshold is crossed, re-emitting namespaces into every
//! new file. [`FederatedSink`] fans writes out to several sinks at once.

use std::path::{Path, PathBuf};

use crate::error::{FuseResult, SinkError};
use crate::model::ResolvedStatement;
use crate::tuple::TupleWriter;

/// A destination for resolved statements.
pub trait StatementSink {
    /// Write one statement.
    fn write(&mut self, statement: &ResolvedStatement) -> FuseResult<()>;

    /// Write every statement from an iterator.
    fn write_all(
        &mut self,
        statements: &mut dyn Iterator<Item = ResolvedStatement>,
    ) -> FuseResult<()> {
        for statement in statements {
            self.write(&statement)?;
        }
        Ok(())
    }

    /// Register a namespace prefix. Registered namespaces survive file
    /// rollovers in splitting sinks.
    fn add_namespace(&mut self, prefix: &str, uri: &str) -> FuseResult<()>;

    /// Flush and release resources. Writes after close are an error.
    fn close(&mut self) -> FuseResult<()>;
}

/// The statement's N-Triples line.
fn statement_line(statement: &ResolvedStatement) -> String {
    format!(
        "{} {} {} .",
        statement.subject, statement.predicate, statement.object
    )
}

/// The statement's quality/provenance annotation comment.
fn annotation_line(statement: &ResolvedStatement) -> String {
    let sources: Vec<&str> = statement.provenance.iter().map(String::as_str).collect();
    format!(
        "# quality={:.4} sources={}",
        statement.quality,
        sources.join(",")
    )
}

fn namespace_line(prefix: &str, uri: &str) -> String {
    format!("# @prefix {prefix}: <{uri}> .")
}

// ---------------------------------------------------------------------------
// File sink
// ---------------------------------------------------------------------------

/// Plain file sink, one statement per line.
pub struct FileSink {
    path: PathBuf,
    writer: Option<TupleWriter>,
    namespaces: Vec<(String, String)>,
    annotate: bool,
    bytes_written: u64,
}

impl FileSink {
    /// Create the output file. `annotate` adds a quality/provenance comment
    /// line after each statement.
    pub fn create(path: impl Into<PathBuf>, annotate: bool) -> FuseResult<Self> {
        let path = path.into();
        let writer = TupleWriter::create(&path)?;
        Ok(Self {
            path,
            writer: Some(writer),
            namespaces: Vec::new(),
            annotate,
            bytes_written: 0,
        })
    }

    /// Uncompressed bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn emit(&mut self, line: &str) -> FuseResult<()> {
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        writer.write_line(line)?;
        self.bytes_written += line.len() as u64 + 1;
        Ok(())
    }
}

impl StatementSink for FileSink {
    fn write(&mut self, statement: &ResolvedStatement) -> FuseResult<()> {
        self.emit(&statement_line(statement))?;
        if self.annotate {
            self.emit(&annotation_line(statement))?;
        }
        Ok(())
    }

    fn add_namespace(&mut self, prefix: &str, uri: &str) -> FuseResult<()> {
        self.namespaces.push((prefix.to_string(), uri.to_string()));
        self.emit(&namespace_line(prefix, uri))
    }

    fn close(&mut self) -> FuseResult<()> {
        if let Some(writer) = self.writer.take() {
            writer.finish()?;
            tracing::debug!(path = %self.path.display(), bytes = self.bytes_written, "sink closed");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Splitting file sink
// ---------------------------------------------------------------------------

/// File sink that rolls over to a new backing file once a byte threshold is
/// exceeded. Part 0 keeps the configured name; later parts are numbered
/// siblings. Namespace declarations are repeated at the top of every part.
pub struct SplittingFileSink {
    base: PathBuf,
    threshold_bytes: u64,
    annotate: bool,
    part: u32,
    namespaces: Vec<(String, String)>,
    current: FileSink,
}

impl SplittingFileSink {
    pub fn create(
        base: impl Into<PathBuf>,
        threshold_bytes: u64,
        annotate: bool,
    ) -> FuseResult<Self> {
        let base = base.into();
        let current = FileSink::create(part_path(&base, 0), annotate)?;
        Ok(Self {
            base,
            threshold_bytes,
            annotate,
            part: 0,
            namespaces: Vec::new(),
            current,
        })
    }

    /// Index of the part currently being written.
    pub fn current_part(&self) -> u32 {
        self.part
    }

    fn roll_over(&mut self) -> FuseResult<()> {
        self.current.close()?;
        self.part += 1;
        let path = part_path(&self.base, self.part);
        tracing::info!(path = %path.display(), part = self.part, "splitting sink rollover");
        self.current = FileSink::create(path, self.annotate)?;
        for (prefix, uri) in self.namespaces.clone() {
            self.current.add_namespace(&prefix, &uri)?;
        }
        Ok(())
    }
}

impl StatementSink for SplittingFileSink {
    fn write(&mut self, statement: &ResolvedStatement) -> FuseResult<()> {
        if self.threshold_bytes > 0 && self.current.bytes_written() >= self.threshold_bytes {
            self.roll_over()?;
        }
        self.current.write(statement)
    }

    fn add_namespace(&mut self, prefix: &str, uri: &str) -> FuseResult<()> {
        self.namespaces.push((prefix.to_string(), uri.to_string()));
        self.current.add_namespace(prefix, uri)
    }

    fn close(&mut self) -> FuseResult<()> {
        self.current.close()
    }
}

/// Path of one output part: part 0 is the base path itself.
fn part_path(base: &Path, part: u32) -> PathBuf {
    if part == 0 {
        return base.to_path_buf();
    }
    let name = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (stem, ext) = match name.split_once('.') {
        Some((stem, ext)) => (stem.to_string(), format!(".{ext}")),
        None => (name, String::new()),
    };
    base.with_file_name(format!("{stem}-{part:04}{ext}"))
}

// ---------------------------------------------------------------------------
// Federated sink
// ---------------------------------------------------------------------------

/// Fans every operation out to multiple sinks.
pub struct FederatedSink {
    sinks: Vec<Box<dyn StatementSink>>,
}

impl FederatedSink {
    pub fn new(sinks: Vec<Box<dyn StatementSink>>) -> Self {
        Self { sinks }
    }
}

impl StatementSink for FederatedSink {
    fn write(&mut self, statement: &ResolvedStatement) -> FuseResult<()> {
        for sink in &mut self.sinks {
            sink.write(statement)?;
        }
        Ok(())
    }

    fn add_namespace(&mut self, prefix: &str, uri: &str) -> FuseResult<()> {
        for sink in &mut self.sinks {
            sink.add_namespace(prefix, uri)?;
        }
        Ok(())
    }

    fn close(&mut self) -> FuseResult<()> {
        for sink in &mut self.sinks {
            sink.close()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Vec sink
// ---------------------------------------------------------------------------

/// Collects statements in memory, for tests and embedding.
#[derive(Default)]
pub struct VecSink {
    statements: Vec<ResolvedStatement>,
    namespaces: Vec<(String, String)>,
    closed: bool,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statements(&self) -> &[ResolvedStatement] {
        &self.statements
    }

    pub fn into_statements(self) -> Vec<ResolvedStatement> {
        self.statements
    }

    pub fn namespaces(&self) -> &[(String, String)] {
        &self.namespaces
    }
}

impl StatementSink for VecSink {
    fn write(&mut self, statement: &ResolvedStatement) -> FuseResult<()> {
        if self.closed {
            return Err(SinkError::Closed.into());
        }
        self.statements.push(statement.clone());
        Ok(())
    }

    fn add_namespace(&mut self, prefix: &str, uri: &str) -> FuseResult<()> {
        self.namespaces.push((prefix.to_string(), uri.to_string()));
        Ok(())
    }

    fn close(&mut self) -> FuseResult<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Term;
    use std::collections::BTreeSet;

    fn statement(n: usize) -> ResolvedStatement {
        ResolvedStatement::new(
            Term::iri(format!("http://ex.org/s{n}")),
            Term::iri("http://ex.org/p"),
            Term::literal(format!("value-{n}")),
            0.75,
            BTreeSet::from(["http://graphs/g1".to_string()]),
        )
    }

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(String::from)
            .collect()
    }

    #[test]
    fn file_sink_writes_parseable_ntriples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.nt");
        let mut sink = FileSink::create(&path, true).unwrap();
        sink.add_namespace("ex", "http://ex.org/").unwrap();
        sink.write(&statement(1)).unwrap();
        sink.close().unwrap();

        // Statement lines parse back through the codec; comments are skipped.
        let mut reader = crate::tuple::TupleReader::open(&path).unwrap();
        let tuple = reader.next_tuple().unwrap().unwrap();
        assert_eq!(tuple.len(), 3);
        assert!(reader.next_tuple().unwrap().is_none());

        let lines = read_lines(&path);
        assert!(lines[0].starts_with("# @prefix ex:"));
        assert!(lines.iter().any(|l| l.starts_with("# quality=0.7500")));
    }

    #[test]
    fn write_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::create(dir.path().join("out.nt"), false).unwrap();
        sink.close().unwrap();
        let err = sink.write(&statement(1)).unwrap_err();
        assert!(matches!(err, crate::error::FuseError::Sink(SinkError::Closed)));
    }

    #[test]
    fn splitting_sink_rolls_over_and_repeats_namespaces() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("out.nt");
        // A threshold small enough that every statement starts a new part.
        let mut sink = SplittingFileSink::create(&base, 10, false).unwrap();
        sink.add_namespace("ex", "http://ex.org/").unwrap();
        for n in 0..3 {
            sink.write(&statement(n)).unwrap();
        }
        sink.close().unwrap();
        assert_eq!(sink.current_part(), 2);

        for path in [
            base.clone(),
            dir.path().join("out-0001.nt"),
            dir.path().join("out-0002.nt"),
        ] {
            let lines = read_lines(&path);
            assert!(
                lines[0].starts_with("# @prefix ex:"),
                "missing namespace in {}",
                path.display()
            );
            assert_eq!(lines.len(), 2);
        }
    }

    #[test]
    fn splitting_sink_zero_threshold_never_rolls() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = SplittingFileSink::create(dir.path().join("out.nt"), 0, false).unwrap();
        for n in 0..100 {
            sink.write(&statement(n)).unwrap();
        }
        sink.close().unwrap();
        assert_eq!(sink.current_part(), 0);
    }

    #[test]
    fn part_path_numbering_respects_extensions() {
        let base = Path::new("/tmp/out.nt.gz");
        assert_eq!(part_path(base, 0), PathBuf::from("/tmp/out.nt.gz"));
        assert_eq!(part_path(base, 1), PathBuf::from("/tmp/out-0001.nt.gz"));
        assert_eq!(
            part_path(Path::new("/tmp/bare"), 2),
            PathBuf::from("/tmp/bare-0002")
        );
    }

    #[test]
    fn federated_sink_fans_out() {
        use std::sync::{Arc, Mutex};

        struct CountingSink(Arc<Mutex<usize>>);
        impl StatementSink for CountingSink {
            fn write(&mut self, _statement: &ResolvedStatement) -> FuseResult<()> {
                *self.0.lock().unwrap() += 1;
                Ok(())
            }
            fn add_namespace(&mut self, _prefix: &str, _uri: &str) -> FuseResult<()> {
                Ok(())
            }
            fn close(&mut self) -> FuseResult<()> {
                Ok(())
            }
        }

        let a = Arc::new(Mutex::new(0));
        let b = Arc::new(Mutex::new(0));
        let mut fed = FederatedSink::new(vec![
            Box::new(CountingSink(Arc::clone(&a))),
            Box::new(CountingSink(Arc::clone(&b))),
        ]);
        fed.write(&statement(1)).unwrap();
        fed.write_all(&mut vec![statement(2), statement(3)].into_iter())
            .unwrap();
        fed.close().unwrap();

        assert_eq!(*a.lock().unwrap(), 3);
        assert_eq!(*b.lock().unwrap(), 3);
    }
}

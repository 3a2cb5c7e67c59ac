//! External-sort input loader: turns unordered federated quad sources into a
//! grouped, subject-ordered stream of resource descriptions.
//!
//! Phases:
//!
//! 1. **Copy** — every source quad is canonicalized and appended to the
//!    primary data file as `[c(S), S, P, O, G]`; description-linking quads
//!    additionally record `[c(O), c(S)]` in the attribute-index file.
//! 2. **Sort** — both files are sorted by leading key, in parallel (they
//!    touch disjoint data and temp files).
//! 3. **Merge-join** — the sorted attribute index is inner-joined against the
//!    sorted primary file on `c(O) = c(S)`, attaching each dependent
//!    resource's describing quads under its owner; the merged file is
//!    re-sorted by owner.
//! 4. **Iterate** — two grouped cursors advance in lock-step by canonical
//!    subject, yielding one [`ResourceDescription`] per subject, in ascending
//!    order, without ever materializing the full dataset.
//!
//! Temporary files live in a run-private directory owned by the loader and
//! are deleted on every exit path — normal completion, error, or panic.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::canon::CanonicalUriMap;
use crate::error::{FuseResult, LoaderError};
use crate::extsort::{ExternalSorter, SortConfig};
use crate::model::{Quad, ResourceDescription, Term};
use crate::source::{QuadSource, RetryConfig, load_with_retry};
use crate::tuple::{TupleReader, TupleWriter};

/// Result type for loader operations.
pub type LoaderResult<T> = std::result::Result<T, LoaderError>;

/// Tuning for one load pass.
#[derive(Debug, Clone, Default)]
pub struct LoaderConfig {
    /// Predicates whose objects are dependent sub-resources, inlined into the
    /// owning resource's description.
    pub description_predicates: BTreeSet<String>,
    /// Drop quads whose subject has no equivalence mapping at all.
    pub output_mapped_subjects_only: bool,
    pub sort: SortConfig,
    pub retry: RetryConfig,
}

/// Counters from one load pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoaderStats {
    /// Quads copied into the primary file.
    pub quads_copied: u64,
    /// Dependent-resource links recorded in the attribute index.
    pub dependent_links: u64,
    /// Quads dropped by the mapped-subjects-only filter.
    pub subjects_dropped: u64,
    /// Records written to the merged-attribute file.
    pub merged_records: u64,
    /// Bytes spilled across all sort passes.
    pub spilled_bytes: u64,
}

// ---------------------------------------------------------------------------
// Temp workspace
// ---------------------------------------------------------------------------

/// Run-private directory holding every intermediate file.
///
/// Backed by a [`tempfile::TempDir`]: the directory and its contents are
/// removed when the workspace drops, which covers normal close, error
/// returns, and unwinding panics alike. Names are randomized, so concurrent
/// runs sharing a parent directory never collide.
struct TempWorkspace {
    dir: tempfile::TempDir,
}

impl TempWorkspace {
    fn create(parent: &Path) -> LoaderResult<Self> {
        std::fs::create_dir_all(parent).map_err(|source| LoaderError::Workspace {
            parent: parent.to_path_buf(),
            source,
        })?;
        let dir = tempfile::Builder::new()
            .prefix("fuse-")
            .tempdir_in(parent)
            .map_err(|source| LoaderError::Workspace {
                parent: parent.to_path_buf(),
                source,
            })?;
        Ok(Self { dir })
    }

    fn file(&self, name: &str, compress: bool) -> PathBuf {
        let ext = if compress { ".nt.gz" } else { ".nt" };
        self.dir.path().join(format!("{name}{ext}"))
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }
}

// ---------------------------------------------------------------------------
// Grouped cursor
// ---------------------------------------------------------------------------

/// Streams a sorted tuple file one same-key group at a time.
struct GroupedCursor {
    reader: TupleReader,
    pending: Option<Vec<Term>>,
}

impl GroupedCursor {
    fn open(path: &Path) -> FuseResult<Self> {
        let mut reader = TupleReader::open(path)?;
        let pending = reader.next_tuple()?;
        Ok(Self { reader, pending })
    }

    /// Sort key of the next group, without consuming it.
    fn peek_key(&self) -> Option<String> {
        self.pending.as_ref().map(|t| t[0].to_string())
    }

    /// All consecutive records sharing the next key.
    fn next_group(&mut self) -> FuseResult<Option<(String, Vec<Vec<Term>>)>> {
        let Some(first) = self.pending.take() else {
            return Ok(None);
        };
        let key = first[0].to_string();
        let mut records = vec![first];
        loop {
            match self.reader.next_tuple()? {
                Some(t) if t[0].to_string() == key => records.push(t),
                other => {
                    self.pending = other;
                    break;
                }
            }
        }
        Ok(Some((key, records)))
    }

    fn corrupt(&self, reason: impl Into<String>) -> LoaderError {
        LoaderError::CorruptTempFile {
            path: self.reader.path().to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Strip the term surface syntax from a group key: `<iri>` becomes the bare
/// IRI, blank labels stay as `_:label`.
fn key_to_subject(key: &str) -> String {
    key.strip_prefix('<')
        .and_then(|k| k.strip_suffix('>'))
        .map_or_else(|| key.to_string(), str::to_string)
}

/// Rebuild a quad from a 5-term `[key, S, P, O, G]` record.
fn record_to_quad(cursor: &GroupedCursor, record: Vec<Term>) -> LoaderResult<Quad> {
    let mut it = record.into_iter();
    let (Some(_key), Some(s), Some(p), Some(o), Some(g), None) = (
        it.next(),
        it.next(),
        it.next(),
        it.next(),
        it.next(),
        it.next(),
    ) else {
        return Err(cursor.corrupt("expected a 5-term record"));
    };
    let Term::Iri(graph) = g else {
        return Err(cursor.corrupt("graph field must be an IRI"));
    };
    Ok(Quad::new(s, p, o, graph))
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Builds the grouped description stream from a set of sources.
pub struct ExternalSortLoader;

impl ExternalSortLoader {
    /// Run the copy/sort/join phases and return the description iterator.
    ///
    /// Sources are drained (and their handles released) during the copy
    /// phase; only the loader's own temp files are read afterwards. Any
    /// failure deletes every temporary file created so far and surfaces a
    /// single [`LoaderError`].
    pub fn load(
        sources: &[Box<dyn QuadSource>],
        canon: &CanonicalUriMap,
        config: &LoaderConfig,
        work_dir: &Path,
    ) -> FuseResult<DescriptionIter> {
        let workspace = TempWorkspace::create(work_dir)?;
        // The workspace drops (and cleans up) if any phase below fails.
        Self::run_phases(sources, canon, config, workspace)
            .map_err(|e| LoaderError::abort(e).into())
    }

    fn run_phases(
        sources: &[Box<dyn QuadSource>],
        canon: &CanonicalUriMap,
        config: &LoaderConfig,
        workspace: TempWorkspace,
    ) -> FuseResult<DescriptionIter> {
        let compress = config.sort.compress;
        let primary_path = workspace.file("primary", compress);
        let attr_path = workspace.file("attributes", compress);
        let primary_sorted = workspace.file("primary-sorted", compress);
        let attr_sorted = workspace.file("attributes-sorted", compress);
        let merged_path = workspace.file("merged", compress);
        let merged_sorted = workspace.file("merged-sorted", compress);

        let mut stats = LoaderStats::default();

        // Phase 1: copy.
        {
            let mut primary = TupleWriter::create(&primary_path)?;
            let mut attrs = TupleWriter::create(&attr_path)?;
            for source in sources {
                load_with_retry(source.as_ref(), &config.retry, &mut |quad| {
                    if config.output_mapped_subjects_only {
                        let mapped = quad
                            .subject
                            .as_iri()
                            .is_some_and(|iri| canon.has_alternatives(iri));
                        if !mapped {
                            stats.subjects_dropped += 1;
                            return Ok(());
                        }
                    }
                    let subject = canon.canonical_term(&quad.subject);
                    if !subject.is_resource() {
                        tracing::warn!(term = %subject, "skipping quad with non-resource subject");
                        return Ok(());
                    }
                    let predicate = canon.canonical_term(&quad.predicate);
                    let object = canon.canonical_term(&quad.object);
                    let graph = canon.canonicalize(&quad.graph).to_string();

                    if object.is_resource()
                        && predicate
                            .as_iri()
                            .is_some_and(|p| config.description_predicates.contains(p))
                    {
                        attrs.write(&[object.clone(), subject.clone()])?;
                        stats.dependent_links += 1;
                    }
                    primary.write(&[
                        subject.clone(),
                        subject,
                        predicate,
                        object,
                        Term::Iri(graph),
                    ])?;
                    stats.quads_copied += 1;
                    Ok(())
                })?;
            }
            primary.finish()?;
            attrs.finish()?;
        }
        tracing::info!(
            quads = stats.quads_copied,
            dependent_links = stats.dependent_links,
            dropped = stats.subjects_dropped,
            "copy phase complete"
        );

        // Phase 2: sort both derived files. The passes touch disjoint data
        // and temp files, so they run in parallel.
        let sorter = ExternalSorter::new(config.sort.clone());
        let (primary_res, attr_res) = rayon::join(
            || sorter.sort(&primary_path, &primary_sorted, workspace.path()),
            || sorter.sort(&attr_path, &attr_sorted, workspace.path()),
        );
        stats.spilled_bytes += primary_res?.spilled_bytes;
        stats.spilled_bytes += attr_res?.spilled_bytes;

        // Phase 3: merge-join, then re-sort by owning subject.
        stats.merged_records = merge_join(&attr_sorted, &primary_sorted, &merged_path)?;
        stats.spilled_bytes += sorter
            .sort(&merged_path, &merged_sorted, workspace.path())?
            .spilled_bytes;
        tracing::info!(merged = stats.merged_records, "merge-join complete");

        // Phase 4: open the lock-step cursors.
        let primary = GroupedCursor::open(&primary_sorted)?;
        let merged = GroupedCursor::open(&merged_sorted)?;
        Ok(DescriptionIter {
            primary,
            merged,
            workspace: Some(workspace),
            stats,
            failed: false,
        })
    }
}

/// Inner join of the attribute index against the primary file.
///
/// Both inputs are sorted by leading key. For every attribute record
/// `[c(O), owner]` whose key matches a primary group, the dependent
/// resource's describing quads are re-emitted under the owner:
/// `[owner, S, P, O, G]`. Attribute keys with no primary group simply drop
/// out (the dependent resource was never described).
fn merge_join(attr_sorted: &Path, primary_sorted: &Path, output: &Path) -> FuseResult<u64> {
    let mut attrs = GroupedCursor::open(attr_sorted)?;
    let mut primary = GroupedCursor::open(primary_sorted)?;
    let mut out = TupleWriter::create(output)?;
    let mut written = 0u64;

    loop {
        let (Some(ka), Some(kp)) = (attrs.peek_key(), primary.peek_key()) else {
            break;
        };
        if ka < kp {
            attrs.next_group()?;
        } else if kp < ka {
            primary.next_group()?;
        } else {
            let (_, attr_records) = attrs.next_group()?.expect("peeked group");
            let (_, prim_records) = primary.next_group()?.expect("peeked group");
            for ar in &attr_records {
                let [_, owner] = ar.as_slice() else {
                    return Err(attrs.corrupt("expected a 2-term attribute record").into());
                };
                for pr in &prim_records {
                    let [_, s, p, o, g] = pr.as_slice() else {
                        return Err(primary.corrupt("expected a 5-term record").into());
                    };
                    out.write(&[owner.clone(), s.clone(), p.clone(), o.clone(), g.clone()])?;
                    written += 1;
                }
            }
        }
    }
    out.finish()?;
    Ok(written)
}

// ---------------------------------------------------------------------------
// Description iterator
// ---------------------------------------------------------------------------

/// Streams resource descriptions in ascending canonical-subject order.
///
/// Owns the temp workspace: dropping the iterator (exhausted, abandoned, or
/// after an error) deletes every intermediate file.
pub struct DescriptionIter {
    primary: GroupedCursor,
    merged: GroupedCursor,
    workspace: Option<TempWorkspace>,
    stats: LoaderStats,
    failed: bool,
}

impl DescriptionIter {
    pub fn stats(&self) -> LoaderStats {
        self.stats
    }

    fn next_description(&mut self) -> FuseResult<Option<ResourceDescription>> {
        let Some((key, records)) = self.primary.next_group()? else {
            // Exhausted: release the workspace eagerly.
            self.workspace.take();
            return Ok(None);
        };

        let mut description = ResourceDescription::new(key_to_subject(&key));
        for record in records {
            description
                .quads
                .push(record_to_quad(&self.primary, record)?);
        }

        // Attach this subject's dependent quads. Merged keys are always a
        // subset of primary keys, so a merged group sorting before the
        // current subject means the intermediate files disagree.
        while let Some(km) = self.merged.peek_key() {
            if km < key {
                return Err(self
                    .merged
                    .corrupt(format!("owner group {km} has no primary group"))
                    .into());
            }
            if km > key {
                break;
            }
            let (_, records) = self.merged.next_group()?.expect("peeked group");
            for record in records {
                description
                    .dependent
                    .push(record_to_quad(&self.merged, record)?);
            }
        }
        Ok(Some(description))
    }
}

impl Iterator for DescriptionIter {
    type Item = FuseResult<ResourceDescription>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_description() {
            Ok(Some(description)) => Some(Ok(description)),
            Ok(None) => None,
            Err(e) => {
                // Clean up before surfacing, per the loader contract.
                self.failed = true;
                self.workspace.take();
                Some(Err(LoaderError::abort(e).into()))
            }
        }
    }
}

//! Canonical URI mapping: equivalence classes over `sameAs`-style links.
//!
//! [`UriEquivalences`] accumulates equivalence pairs with union-find
//! semantics; [`UriEquivalences::build`] freezes them into a read-only
//! [`CanonicalUriMap`] that serves the rest of the run. The map is built once
//! before the loader starts and never mutated afterwards, so it can be shared
//! freely across threads.
//!
//! Representative selection is deterministic: the lexicographically smallest
//! preferred member wins, falling back to the lexicographically smallest
//! member of the class.

use std::collections::{BTreeSet, HashMap};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::error::{CanonError, FuseResult};
use crate::model::Term;
use crate::source::{QuadSource, RetryConfig, load_with_retry};

/// Result type for canonical-mapping operations.
pub type CanonResult<T> = std::result::Result<T, CanonError>;

/// The default equivalence-link predicate.
pub const OWL_SAME_AS: &str = "http://www.w3.org/2002/07/owl#sameAs";

// ---------------------------------------------------------------------------
// Builder (union-find)
// ---------------------------------------------------------------------------

/// Accumulates equivalence pairs into union-find classes.
#[derive(Debug, Default)]
pub struct UriEquivalences {
    index: HashMap<String, usize>,
    labels: Vec<String>,
    parent: Vec<usize>,
    rank: Vec<u8>,
    skipped: u64,
}

impl UriEquivalences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain every quad from the given equivalence-link sources, collecting
    /// pairs whose predicate is in `equivalence_predicates`.
    pub fn collect(
        sources: &[Box<dyn QuadSource>],
        equivalence_predicates: &BTreeSet<String>,
        retry: &RetryConfig,
    ) -> FuseResult<Self> {
        let mut eq = Self::new();
        for source in sources {
            load_with_retry(source.as_ref(), retry, &mut |quad| {
                if quad
                    .predicate
                    .as_iri()
                    .is_some_and(|p| equivalence_predicates.contains(p))
                {
                    eq.add_pair(&quad.subject, &quad.object);
                }
                Ok(())
            })?;
        }
        tracing::info!(
            identifiers = eq.labels.len(),
            skipped = eq.skipped,
            "collected equivalence links"
        );
        Ok(eq)
    }

    /// Record that `a` and `b` denote the same resource.
    ///
    /// Links with a non-IRI endpoint are malformed; they are skipped with a
    /// warning and the run continues.
    pub fn add_pair(&mut self, a: &Term, b: &Term) {
        match (a.as_iri(), b.as_iri()) {
            (Some(a), Some(b)) => self.add_iri_pair(a, b),
            _ => {
                let bad = if a.as_iri().is_none() { a } else { b };
                let err = CanonError::MalformedIdentifier {
                    term: bad.to_string(),
                };
                tracing::warn!(%err, "skipping equivalence link");
                self.skipped += 1;
            }
        }
    }

    /// Record an equivalence between two IRIs.
    pub fn add_iri_pair(&mut self, a: &str, b: &str) {
        let ia = self.intern(a);
        let ib = self.intern(b);
        self.union(ia, ib);
    }

    /// Number of links skipped as malformed.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn intern(&mut self, uri: &str) -> usize {
        if let Some(&i) = self.index.get(uri) {
            return i;
        }
        let i = self.labels.len();
        self.index.insert(uri.to_string(), i);
        self.labels.push(uri.to_string());
        self.parent.push(i);
        self.rank.push(0);
        i
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }

    /// Freeze the classes into a read-only map.
    ///
    /// Within each class, the representative is the lexicographically smallest
    /// member of `preferred` present in the class, or the lexicographically
    /// smallest member overall. Stable across runs for identical inputs.
    pub fn build(mut self, preferred: &BTreeSet<String>) -> CanonicalUriMap {
        let mut classes: HashMap<usize, Vec<usize>> = HashMap::new();
        for i in 0..self.labels.len() {
            let root = self.find(i);
            classes.entry(root).or_default().push(i);
        }

        let mut canonical = HashMap::new();
        for members in classes.into_values() {
            if members.len() < 2 {
                // Singleton classes map to themselves implicitly.
                continue;
            }
            let rep = members
                .iter()
                .map(|&i| self.labels[i].as_str())
                .filter(|uri| preferred.contains(*uri))
                .min()
                .or_else(|| members.iter().map(|&i| self.labels[i].as_str()).min())
                .expect("non-empty class")
                .to_string();
            for &i in &members {
                canonical.insert(self.labels[i].clone(), rep.clone());
            }
        }
        CanonicalUriMap { canonical }
    }
}

// ---------------------------------------------------------------------------
// Frozen map
// ---------------------------------------------------------------------------

/// Read-only identifier canonicalization. Idempotent: mapping a canonical
/// identifier returns itself; identifiers never seen in a link map to
/// themselves.
#[derive(Debug, Default, Clone)]
pub struct CanonicalUriMap {
    /// Members of multi-member classes → their representative. Singletons and
    /// unseen identifiers are identity-mapped implicitly.
    canonical: HashMap<String, String>,
}

impl CanonicalUriMap {
    /// An empty mapping (every identifier is its own representative).
    pub fn empty() -> Self {
        Self::default()
    }

    /// The canonical representative for `uri`.
    pub fn canonicalize<'a>(&'a self, uri: &'a str) -> &'a str {
        self.canonical.get(uri).map_or(uri, String::as_str)
    }

    /// Rewrite a term's IRI to its canonical form. Literals and blank nodes
    /// pass through untouched.
    pub fn canonical_term(&self, term: &Term) -> Term {
        match term {
            Term::Iri(iri) => match self.canonical.get(iri) {
                Some(rep) => Term::Iri(rep.clone()),
                None => term.clone(),
            },
            _ => term.clone(),
        }
    }

    /// True iff `uri`'s equivalence class has more than one member.
    pub fn has_alternatives(&self, uri: &str) -> bool {
        self.canonical.contains_key(uri)
    }

    /// Number of identifiers belonging to multi-member classes.
    pub fn mapped_len(&self) -> usize {
        self.canonical.len()
    }

    /// Distinct canonical representatives of multi-member classes.
    pub fn representatives(&self) -> BTreeSet<&str> {
        self.canonical.values().map(String::as_str).collect()
    }
}

// ---------------------------------------------------------------------------
// Persistence: one identifier per line, atomic replace
// ---------------------------------------------------------------------------

/// Read a line-per-identifier UTF-8 file. A missing file is treated as empty.
pub fn load_uri_set(path: &Path) -> CanonResult<BTreeSet<String>> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(source) => {
            return Err(CanonError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let mut set = BTreeSet::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|source| CanonError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            set.insert(trimmed.to_string());
        }
    }
    Ok(set)
}

/// Write a line-per-identifier file atomically: the content goes to a
/// temporary file first and is renamed into place, so a concurrent reader
/// never observes a partial file.
pub fn save_uri_set<I, S>(path: &Path, uris: I) -> CanonResult<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let persist_err = |source: std::io::Error| CanonError::Persist {
        path: path.to_path_buf(),
        source,
    };
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut tmp = match dir {
        Some(dir) => tempfile::NamedTempFile::new_in(dir),
        None => tempfile::NamedTempFile::new(),
    }
    .map_err(persist_err)?;
    for uri in uris {
        writeln!(tmp, "{}", uri.as_ref()).map_err(persist_err)?;
    }
    tmp.persist(path)
        .map_err(|e| persist_err(e.error))
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(pairs: &[(&str, &str)], preferred: &[&str]) -> CanonicalUriMap {
        let mut eq = UriEquivalences::new();
        for (a, b) in pairs {
            eq.add_iri_pair(a, b);
        }
        let preferred: BTreeSet<String> = preferred.iter().map(|s| s.to_string()).collect();
        eq.build(&preferred)
    }

    #[test]
    fn lexicographically_smallest_wins() {
        let map = build(&[("http://b", "http://a"), ("http://b", "http://c")], &[]);
        assert_eq!(map.canonicalize("http://a"), "http://a");
        assert_eq!(map.canonicalize("http://b"), "http://a");
        assert_eq!(map.canonicalize("http://c"), "http://a");
    }

    #[test]
    fn preferred_member_overrides_lexicographic_order() {
        let map = build(
            &[("http://b", "http://a"), ("http://b", "http://c")],
            &["http://c"],
        );
        assert_eq!(map.canonicalize("http://a"), "http://c");
        assert_eq!(map.canonicalize("http://b"), "http://c");
    }

    #[test]
    fn smallest_preferred_wins_among_several() {
        let map = build(
            &[("http://b", "http://a"), ("http://b", "http://c")],
            &["http://c", "http://b"],
        );
        assert_eq!(map.canonicalize("http://a"), "http://b");
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let map = build(&[("http://x", "http://y"), ("http://p", "http://q")], &[]);
        for uri in ["http://x", "http://y", "http://p", "http://q", "http://z"] {
            let once = map.canonicalize(uri);
            assert_eq!(map.canonicalize(once), once);
        }
    }

    #[test]
    fn unseen_identifier_maps_to_itself() {
        let map = build(&[("http://a", "http://b")], &[]);
        assert_eq!(map.canonicalize("http://nowhere"), "http://nowhere");
        assert!(!map.has_alternatives("http://nowhere"));
    }

    #[test]
    fn has_alternatives_only_for_multi_member_classes() {
        let mut eq = UriEquivalences::new();
        eq.add_iri_pair("http://a", "http://b");
        // A self-link creates a singleton class.
        eq.add_iri_pair("http://solo", "http://solo");
        let map = eq.build(&BTreeSet::new());
        assert!(map.has_alternatives("http://a"));
        assert!(map.has_alternatives("http://b"));
        assert!(!map.has_alternatives("http://solo"));
    }

    #[test]
    fn transitive_chains_collapse_to_one_class() {
        let map = build(
            &[
                ("http://d", "http://c"),
                ("http://c", "http://b"),
                ("http://b", "http://a"),
            ],
            &[],
        );
        for uri in ["http://a", "http://b", "http://c", "http://d"] {
            assert_eq!(map.canonicalize(uri), "http://a");
        }
    }

    #[test]
    fn literal_endpoint_is_skipped_with_warning() {
        let mut eq = UriEquivalences::new();
        eq.add_pair(&Term::iri("http://a"), &Term::literal("not a uri"));
        eq.add_pair(&Term::iri("http://a"), &Term::iri("http://b"));
        assert_eq!(eq.skipped(), 1);
        let map = eq.build(&BTreeSet::new());
        assert_eq!(map.canonicalize("http://b"), "http://a");
    }

    #[test]
    fn uri_set_roundtrip_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canonical.txt");

        assert!(load_uri_set(&path).unwrap().is_empty());

        save_uri_set(&path, ["http://b", "http://a"]).unwrap();
        let set = load_uri_set(&path).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains("http://a"));

        // Overwrite is atomic and replaces content.
        save_uri_set(&path, ["http://only"]).unwrap();
        let set = load_uri_set(&path).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains("http://only"));
    }
}

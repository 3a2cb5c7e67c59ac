//! Core data model: RDF terms, quads, resource descriptions, resolved output.
//!
//! Everything downstream of the sources speaks these types. Terms carry their
//! N-Triples-style surface syntax in `Display`, which is also the byte-stable
//! representation the tuple codec and the external sorter operate on.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single RDF value: IRI, literal, or blank node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Term {
    /// An IRI reference, stored without the surrounding angle brackets.
    Iri(String),
    /// A literal with optional datatype IRI or language tag (mutually exclusive).
    Literal {
        lexical: String,
        datatype: Option<String>,
        lang: Option<String>,
    },
    /// A blank node label, stored without the `_:` prefix.
    Blank(String),
}

impl Term {
    /// Construct an IRI term.
    pub fn iri(value: impl Into<String>) -> Self {
        Term::Iri(value.into())
    }

    /// Construct a plain (untyped, untagged) literal.
    pub fn literal(value: impl Into<String>) -> Self {
        Term::Literal {
            lexical: value.into(),
            datatype: None,
            lang: None,
        }
    }

    /// Construct a typed literal.
    pub fn typed_literal(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        Term::Literal {
            lexical: value.into(),
            datatype: Some(datatype.into()),
            lang: None,
        }
    }

    /// True if this term is an IRI.
    pub fn is_iri(&self) -> bool {
        matches!(self, Term::Iri(_))
    }

    /// The IRI string, if this term is an IRI.
    pub fn as_iri(&self) -> Option<&str> {
        match self {
            Term::Iri(iri) => Some(iri),
            _ => None,
        }
    }

    /// True if this term can appear in subject position (IRI or blank node).
    pub fn is_resource(&self) -> bool {
        matches!(self, Term::Iri(_) | Term::Blank(_))
    }
}

/// Escape a literal's lexical form for N-Triples output.
fn escape_literal(s: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for c in s.chars() {
        match c {
            '\\' => write!(f, "\\\\")?,
            '"' => write!(f, "\\\"")?,
            '\n' => write!(f, "\\n")?,
            '\r' => write!(f, "\\r")?,
            '\t' => write!(f, "\\t")?,
            _ => write!(f, "{c}")?,
        }
    }
    Ok(())
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{iri}>"),
            Term::Literal {
                lexical,
                datatype,
                lang,
            } => {
                write!(f, "\"")?;
                escape_literal(lexical, f)?;
                write!(f, "\"")?;
                if let Some(lang) = lang {
                    write!(f, "@{lang}")?;
                } else if let Some(dt) = datatype {
                    write!(f, "^^<{dt}>")?;
                }
                Ok(())
            }
            Term::Blank(label) => write!(f, "_:{label}"),
        }
    }
}

/// A (subject, predicate, object, named-graph) statement.
///
/// The graph is always present: sources substitute their default context for
/// quads that arrive without one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Quad {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
    pub graph: String,
}

impl Quad {
    pub fn new(subject: Term, predicate: Term, object: Term, graph: impl Into<String>) -> Self {
        Self {
            subject,
            predicate,
            object,
            graph: graph.into(),
        }
    }
}

impl fmt::Display for Quad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} <{}> .",
            self.subject, self.predicate, self.object, self.graph
        )
    }
}

/// All quads describing one canonical subject, as grouped by the loader.
///
/// `quads` hold the subject's own statements (subjects already rewritten to
/// the canonical form). `dependent` holds statements about sub-resources that
/// were pulled in transitively via a description-linking predicate; their
/// subjects differ from `subject`.
#[derive(Debug, Clone)]
pub struct ResourceDescription {
    /// Canonical subject, in term surface syntax (`<iri>` content or `_:label`).
    pub subject: String,
    pub quads: Vec<Quad>,
    pub dependent: Vec<Quad>,
}

impl ResourceDescription {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            quads: Vec::new(),
            dependent: Vec::new(),
        }
    }

    /// Total number of quads, direct and dependent.
    pub fn len(&self) -> usize {
        self.quads.len() + self.dependent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quads.is_empty() && self.dependent.is_empty()
    }
}

/// One resolved output statement with its quality score and provenance.
///
/// Created once per resolved conflict cluster, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedStatement {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
    /// Aggregate quality in `[0, 1]`.
    pub quality: f64,
    /// Source named-graphs this value was drawn from. Never empty; synthesized
    /// values carry the union of their constituents' provenance.
    pub provenance: BTreeSet<String>,
}

impl ResolvedStatement {
    pub fn new(
        subject: Term,
        predicate: Term,
        object: Term,
        quality: f64,
        provenance: BTreeSet<String>,
    ) -> Self {
        Self {
            subject,
            predicate,
            object,
            quality,
            provenance,
        }
    }
}

/// Parse a subject key back into a term: `_:label` for blank nodes, an IRI
/// otherwise. Subject keys are produced by the loader from resource terms.
pub fn subject_term(key: &str) -> Term {
    match key.strip_prefix("_:") {
        Some(label) => Term::Blank(label.to_string()),
        None => Term::Iri(key.to_string()),
    }
}

/// The sort/group key for a resource term: the bare IRI, or `_:label`.
pub fn subject_key(term: &Term) -> Option<String> {
    match term {
        Term::Iri(iri) => Some(iri.clone()),
        Term::Blank(label) => Some(format!("_:{label}")),
        Term::Literal { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_display_roundtrip_shapes() {
        assert_eq!(Term::iri("http://ex.org/a").to_string(), "<http://ex.org/a>");
        assert_eq!(Term::literal("hi").to_string(), "\"hi\"");
        assert_eq!(
            Term::typed_literal("2021-01-01", "http://www.w3.org/2001/XMLSchema#date")
                .to_string(),
            "\"2021-01-01\"^^<http://www.w3.org/2001/XMLSchema#date>"
        );
        assert_eq!(Term::Blank("b0".into()).to_string(), "_:b0");
    }

    #[test]
    fn literal_escaping() {
        let t = Term::literal("a \"b\"\nc\\d");
        assert_eq!(t.to_string(), "\"a \\\"b\\\"\\nc\\\\d\"");
    }

    #[test]
    fn language_tag_wins_over_datatype_slot() {
        let t = Term::Literal {
            lexical: "chat".into(),
            datatype: None,
            lang: Some("fr".into()),
        };
        assert_eq!(t.to_string(), "\"chat\"@fr");
    }

    #[test]
    fn quad_display_is_nquads_line() {
        let q = Quad::new(
            Term::iri("http://ex.org/s"),
            Term::iri("http://ex.org/p"),
            Term::literal("v"),
            "http://ex.org/g",
        );
        assert_eq!(
            q.to_string(),
            "<http://ex.org/s> <http://ex.org/p> \"v\" <http://ex.org/g> ."
        );
    }

    #[test]
    fn subject_key_and_back() {
        let iri = Term::iri("http://ex.org/x");
        let blank = Term::Blank("n1".into());
        assert_eq!(subject_key(&iri).unwrap(), "http://ex.org/x");
        assert_eq!(subject_key(&blank).unwrap(), "_:n1");
        assert_eq!(subject_term("http://ex.org/x"), iri);
        assert_eq!(subject_term("_:n1"), blank);
        assert_eq!(subject_key(&Term::literal("x")), None);
    }
}

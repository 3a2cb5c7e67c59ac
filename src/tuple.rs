//! Line-oriented tuple codec.
//!
//! One tuple per line: whitespace-separated terms in N-Triples surface syntax,
//! terminated by ` .`. Blank lines and `#` comment lines are skipped on read.
//! Files with a `.gz` extension are transparently gzip-compressed — a storage
//! concern only, comparison and parsing always see decompressed text.
//!
//! The writer preserves the order of `write` calls exactly, so consumers can
//! rely on positional semantics before sorting.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::error::TupleError;
use crate::model::Term;

/// Result type for codec operations.
pub type TupleResult<T> = std::result::Result<T, TupleError>;

/// True if the path names a gzip-compressed file.
pub(crate) fn is_gz(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "gz")
}

/// Open a buffered line reader over a possibly-gzip'd file.
pub(crate) fn open_raw(path: &Path) -> io::Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    if is_gz(path) {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

enum SinkInner {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl SinkInner {
    fn as_write(&mut self) -> &mut dyn Write {
        match self {
            SinkInner::Plain(w) => w,
            SinkInner::Gzip(w) => w,
        }
    }
}

/// Appends tuples to a file, one line per `write` call, in call order.
pub struct TupleWriter {
    path: PathBuf,
    out: SinkInner,
    lines: u64,
}

impl TupleWriter {
    /// Create (truncate) the file. Compression follows the `.gz` extension.
    pub fn create(path: &Path) -> TupleResult<Self> {
        let file = File::create(path).map_err(|source| TupleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let buf = BufWriter::new(file);
        let out = if is_gz(path) {
            SinkInner::Gzip(GzEncoder::new(buf, Compression::fast()))
        } else {
            SinkInner::Plain(buf)
        };
        Ok(Self {
            path: path.to_path_buf(),
            out,
            lines: 0,
        })
    }

    fn io_err(&self, source: io::Error) -> TupleError {
        TupleError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Append one tuple line. Fails on empty tuples — they could not be
    /// re-parsed.
    pub fn write(&mut self, terms: &[Term]) -> TupleResult<()> {
        if terms.is_empty() {
            return Err(TupleError::Malformed {
                line: self.lines + 1,
                reason: "refusing to write a tuple with no values".into(),
            });
        }
        let mut line = String::new();
        for (i, term) in terms.iter().enumerate() {
            if i > 0 {
                line.push(' ');
            }
            line.push_str(&term.to_string());
        }
        line.push_str(" .");
        self.write_line(&line)
    }

    /// Append one raw, already-formatted line (used by the sorter when moving
    /// lines between runs without re-parsing).
    pub fn write_line(&mut self, line: &str) -> TupleResult<()> {
        let result = {
            let w = self.out.as_write();
            w.write_all(line.as_bytes()).and_then(|()| w.write_all(b"\n"))
        };
        result.map_err(|e| self.io_err(e))?;
        self.lines += 1;
        Ok(())
    }

    /// Number of lines written so far.
    pub fn lines_written(&self) -> u64 {
        self.lines
    }

    /// Flush and finalize. Required for gzip output — dropping without
    /// finishing truncates the trailing gzip frame.
    pub fn finish(self) -> TupleResult<()> {
        let path = self.path;
        let res = match self.out {
            SinkInner::Plain(mut w) => w.flush(),
            SinkInner::Gzip(w) => w.finish().and_then(|mut inner| inner.flush()),
        };
        res.map_err(|source| TupleError::Io { path, source })
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Lazily parses one tuple line at a time.
pub struct TupleReader {
    path: PathBuf,
    input: Box<dyn BufRead>,
    line_no: u64,
}

impl TupleReader {
    /// Open a tuple file for reading. Decompression follows the `.gz` extension.
    pub fn open(path: &Path) -> TupleResult<Self> {
        let input = open_raw(path).map_err(|source| TupleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            input,
            line_no: 0,
        })
    }

    /// The file being read.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the next raw line, `None` at end of file.
    fn next_line(&mut self) -> TupleResult<Option<String>> {
        let mut buf = String::new();
        let n = self
            .input
            .read_line(&mut buf)
            .map_err(|source| TupleError::Io {
                path: self.path.clone(),
                source,
            })?;
        if n == 0 {
            return Ok(None);
        }
        self.line_no += 1;
        while buf.ends_with('\n') || buf.ends_with('\r') {
            buf.pop();
        }
        Ok(Some(buf))
    }

    /// Parse the next tuple, skipping blank lines and `#` comments.
    /// Returns `None` at end of input.
    pub fn next_tuple(&mut self) -> TupleResult<Option<Vec<Term>>> {
        loop {
            let Some(line) = self.next_line()? else {
                return Ok(None);
            };
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            return parse_tuple(trimmed, self.line_no).map(Some);
        }
    }
}

// ---------------------------------------------------------------------------
// Line parser
// ---------------------------------------------------------------------------

fn malformed(line: u64, reason: impl Into<String>) -> TupleError {
    TupleError::Malformed {
        line,
        reason: reason.into(),
    }
}

/// Parse one non-blank, non-comment line into its terms.
///
/// The line must contain at least one term and end with the `.` terminator.
pub fn parse_tuple(line: &str, line_no: u64) -> TupleResult<Vec<Term>> {
    let mut terms = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let Some(&c) = chars.peek() else {
            return Err(malformed(line_no, "line lacks the terminating '.'"));
        };
        match c {
            '.' => {
                chars.next();
                if chars.any(|c| !c.is_whitespace()) {
                    return Err(malformed(line_no, "content after the terminating '.'"));
                }
                if terms.is_empty() {
                    return Err(malformed(line_no, "no values before terminator"));
                }
                return Ok(terms);
            }
            '<' => {
                chars.next();
                let mut iri = String::new();
                loop {
                    match chars.next() {
                        Some('>') => break,
                        Some(c) => iri.push(c),
                        None => return Err(malformed(line_no, "unterminated IRI")),
                    }
                }
                terms.push(Term::Iri(iri));
            }
            '"' => {
                chars.next();
                let mut lexical = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => lexical.push('\n'),
                            Some('r') => lexical.push('\r'),
                            Some('t') => lexical.push('\t'),
                            Some(c @ ('"' | '\\')) => lexical.push(c),
                            Some(c) => lexical.push(c),
                            None => return Err(malformed(line_no, "unterminated escape")),
                        },
                        Some(c) => lexical.push(c),
                        None => return Err(malformed(line_no, "unterminated literal")),
                    }
                }
                let (mut datatype, mut lang) = (None, None);
                match chars.peek() {
                    Some('@') => {
                        chars.next();
                        let mut tag = String::new();
                        while chars
                            .peek()
                            .is_some_and(|c| c.is_ascii_alphanumeric() || *c == '-')
                        {
                            tag.push(chars.next().unwrap());
                        }
                        if tag.is_empty() {
                            return Err(malformed(line_no, "empty language tag"));
                        }
                        lang = Some(tag);
                    }
                    Some('^') => {
                        chars.next();
                        if chars.next() != Some('^') || chars.next() != Some('<') {
                            return Err(malformed(line_no, "malformed datatype marker"));
                        }
                        let mut dt = String::new();
                        loop {
                            match chars.next() {
                                Some('>') => break,
                                Some(c) => dt.push(c),
                                None => {
                                    return Err(malformed(line_no, "unterminated datatype IRI"));
                                }
                            }
                        }
                        datatype = Some(dt);
                    }
                    _ => {}
                }
                terms.push(Term::Literal {
                    lexical,
                    datatype,
                    lang,
                });
            }
            '_' => {
                chars.next();
                if chars.next() != Some(':') {
                    return Err(malformed(line_no, "blank node label must start with '_:'"));
                }
                let mut label = String::new();
                while chars.peek().is_some_and(|c| !c.is_whitespace()) {
                    label.push(chars.next().unwrap());
                }
                if label.is_empty() {
                    return Err(malformed(line_no, "empty blank node label"));
                }
                terms.push(Term::Blank(label));
            }
            other => {
                return Err(malformed(
                    line_no,
                    format!("unexpected character '{other}'"),
                ));
            }
        }
    }
}

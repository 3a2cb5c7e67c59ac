//! External merge sort over newline-delimited tuple files.
//!
//! Reads bounded-size chunks into memory, sorts each by the line's leading
//! term, spills sorted runs to disk, then k-way-merges runs (bounded fan-in)
//! until one sorted file remains. A memory ceiling of zero or below degrades
//! gracefully to a single in-memory sort.
//!
//! Runs may be gzip-compressed; comparisons always operate on decompressed
//! text, so compression never alters sort semantics. Equal keys carry no
//! order guarantee.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use crate::error::SortError;
use crate::tuple::{TupleWriter, open_raw};

/// Result type for sort operations.
pub type SortResult<T> = std::result::Result<T, SortError>;

/// Maximum number of runs merged in one pass.
const MERGE_FANIN: usize = 64;

/// Tuning for the external sorter.
#[derive(Debug, Clone)]
pub struct SortConfig {
    /// In-memory chunk ceiling in bytes. Zero or negative means unbounded
    /// (one in-memory sort, no spills).
    pub memory_limit_bytes: i64,
    /// Gzip-compress spilled runs.
    pub compress: bool,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            memory_limit_bytes: 64 * 1024 * 1024,
            compress: false,
        }
    }
}

/// Counters from one sort pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct SortStats {
    /// Lines sorted.
    pub lines: u64,
    /// Spilled runs (0 for a pure in-memory sort).
    pub runs: usize,
    /// Bytes of line data spilled to disk, pre-compression.
    pub spilled_bytes: u64,
}

/// The sort key of a tuple line: its leading term.
///
/// Leading terms are resource terms (`<iri>` or `_:label`) and contain no
/// whitespace, so the first whitespace-delimited token is the whole term.
pub fn leading_term(line: &str) -> &str {
    line.split_whitespace().next().unwrap_or("")
}

/// Disk-spilling sorter for tuple files.
pub struct ExternalSorter {
    config: SortConfig,
}

impl ExternalSorter {
    pub fn new(config: SortConfig) -> Self {
        Self { config }
    }

    /// Sort `input` into `output` by leading term, spilling runs under
    /// `work_dir` as needed. Output compression follows the output path's
    /// `.gz` extension; run compression follows the config.
    pub fn sort(&self, input: &Path, output: &Path, work_dir: &Path) -> SortResult<SortStats> {
        let mut reader = open_raw(input).map_err(|source| SortError::Input { source })?;
        let mut stats = SortStats::default();

        if self.config.memory_limit_bytes <= 0 {
            let mut lines = Vec::new();
            while let Some(line) = read_line(&mut reader)? {
                lines.push(line);
            }
            stats.lines = lines.len() as u64;
            write_sorted(lines, output)?;
            return Ok(stats);
        }

        let limit = self.config.memory_limit_bytes as u64;
        let run_dir = tempfile::Builder::new()
            .prefix("sort-")
            .tempdir_in(work_dir)
            .map_err(|source| SortError::Spill {
                dir: work_dir.to_path_buf(),
                source,
            })?;

        let mut runs: Vec<PathBuf> = Vec::new();
        let mut chunk: Vec<String> = Vec::new();
        let mut chunk_bytes: u64 = 0;

        while let Some(line) = read_line(&mut reader)? {
            stats.lines += 1;
            chunk_bytes += line.len() as u64 + 1;
            chunk.push(line);
            if chunk_bytes >= limit {
                let run = self.spill(std::mem::take(&mut chunk), run_dir.path(), runs.len())?;
                runs.push(run);
                stats.spilled_bytes += chunk_bytes;
                chunk_bytes = 0;
            }
        }

        if runs.is_empty() {
            // Everything fit in one chunk.
            write_sorted(chunk, output)?;
            return Ok(stats);
        }
        if !chunk.is_empty() {
            let run = self.spill(chunk, run_dir.path(), runs.len())?;
            runs.push(run);
            stats.spilled_bytes += chunk_bytes;
        }
        stats.runs = runs.len();

        // Merge rounds until one pass can produce the final output.
        let mut round = 0usize;
        while runs.len() > MERGE_FANIN {
            round += 1;
            let mut next: Vec<PathBuf> = Vec::new();
            for (i, batch) in runs.chunks(MERGE_FANIN).enumerate() {
                let target = run_dir
                    .path()
                    .join(format!("merge-{round}-{i}{}", run_ext(self.config.compress)));
                merge_runs(batch, &target)?;
                next.push(target);
            }
            runs = next;
        }
        merge_runs(&runs, output)?;
        tracing::debug!(
            lines = stats.lines,
            runs = stats.runs,
            spilled_bytes = stats.spilled_bytes,
            output = %output.display(),
            "external sort complete"
        );
        Ok(stats)
    }

    fn spill(&self, mut chunk: Vec<String>, dir: &Path, index: usize) -> SortResult<PathBuf> {
        chunk.sort_unstable_by(|a, b| leading_term(a).cmp(leading_term(b)));
        let path = dir.join(format!("run-{index:06}{}", run_ext(self.config.compress)));
        let mut writer = TupleWriter::create(&path).map_err(|e| spill_err(dir, e))?;
        for line in &chunk {
            writer.write_line(line).map_err(|e| spill_err(dir, e))?;
        }
        writer.finish().map_err(|e| spill_err(dir, e))?;
        Ok(path)
    }
}

fn run_ext(compress: bool) -> &'static str {
    if compress { ".txt.gz" } else { ".txt" }
}

fn spill_err(dir: &Path, e: crate::error::TupleError) -> SortError {
    SortError::Spill {
        dir: dir.to_path_buf(),
        source: std::io::Error::other(e),
    }
}

fn read_line(reader: &mut Box<dyn BufRead>) -> SortResult<Option<String>> {
    let mut buf = String::new();
    let n = reader
        .read_line(&mut buf)
        .map_err(|source| SortError::Input { source })?;
    if n == 0 {
        return Ok(None);
    }
    while buf.ends_with('\n') || buf.ends_with('\r') {
        buf.pop();
    }
    Ok(Some(buf))
}

fn write_sorted(mut lines: Vec<String>, output: &Path) -> SortResult<()> {
    lines.sort_unstable_by(|a, b| leading_term(a).cmp(leading_term(b)));
    let mut writer = TupleWriter::create(output).map_err(to_merge_err)?;
    for line in &lines {
        writer.write_line(line).map_err(to_merge_err)?;
    }
    writer.finish().map_err(to_merge_err)
}

fn to_merge_err(e: crate::error::TupleError) -> SortError {
    SortError::Merge {
        source: std::io::Error::other(e),
    }
}

/// One k-way merge pass over sorted runs.
fn merge_runs(runs: &[PathBuf], output: &Path) -> SortResult<()> {
    let mut readers: Vec<Box<dyn BufRead>> = Vec::with_capacity(runs.len());
    for run in runs {
        readers.push(open_raw(run).map_err(|source| SortError::Merge { source })?);
    }

    // Heap entries order by (key, run index); the line rides along.
    let mut heap: BinaryHeap<Reverse<(String, usize, String)>> = BinaryHeap::new();
    for (idx, reader) in readers.iter_mut().enumerate() {
        if let Some(line) = read_line(reader)? {
            heap.push(Reverse((leading_term(&line).to_string(), idx, line)));
        }
    }

    let mut writer = TupleWriter::create(output).map_err(to_merge_err)?;
    while let Some(Reverse((_, idx, line))) = heap.pop() {
        writer.write_line(&line).map_err(to_merge_err)?;
        if let Some(next) = read_line(&mut readers[idx])? {
            heap.push(Reverse((leading_term(&next).to_string(), idx, next)));
        }
    }
    writer.finish().map_err(to_merge_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_lines(path: &Path, lines: &[String]) {
        let mut f = std::fs::File::create(path).unwrap();
        for l in lines {
            writeln!(f, "{l}").unwrap();
        }
    }

    fn read_keys(path: &Path) -> Vec<String> {
        let mut reader = open_raw(path).unwrap();
        let mut keys = Vec::new();
        while let Some(line) = read_line(&mut reader).unwrap() {
            keys.push(leading_term(&line).to_string());
        }
        keys
    }

    fn unsorted_input(n: usize) -> Vec<String> {
        // Deterministic shuffle: stride through the key space.
        (0..n)
            .map(|i| (i * 7919) % n)
            .map(|k| format!("<http://ex.org/{k:05}> <http://ex.org/p> \"{k}\" ."))
            .collect()
    }

    #[test]
    fn in_memory_sort_when_unbounded() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        let output = dir.path().join("out.txt");
        write_lines(&input, &unsorted_input(100));

        let sorter = ExternalSorter::new(SortConfig {
            memory_limit_bytes: 0,
            compress: false,
        });
        let stats = sorter.sort(&input, &output, dir.path()).unwrap();
        assert_eq!(stats.lines, 100);
        assert_eq!(stats.runs, 0);

        let keys = read_keys(&output);
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(keys.len(), 100);
    }

    #[test]
    fn spilling_sort_produces_same_order() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        let output = dir.path().join("out.txt");
        write_lines(&input, &unsorted_input(500));

        // Tiny ceiling forces many runs.
        let sorter = ExternalSorter::new(SortConfig {
            memory_limit_bytes: 512,
            compress: false,
        });
        let stats = sorter.sort(&input, &output, dir.path()).unwrap();
        assert!(stats.runs > 1);
        assert!(stats.spilled_bytes > 0);

        let keys = read_keys(&output);
        assert_eq!(keys.len(), 500);
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn compressed_runs_do_not_change_order() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        let plain = dir.path().join("plain.txt");
        let gz = dir.path().join("gz.txt");
        write_lines(&input, &unsorted_input(300));

        ExternalSorter::new(SortConfig {
            memory_limit_bytes: 1024,
            compress: false,
        })
        .sort(&input, &plain, dir.path())
        .unwrap();
        ExternalSorter::new(SortConfig {
            memory_limit_bytes: 1024,
            compress: true,
        })
        .sort(&input, &gz, dir.path())
        .unwrap();

        assert_eq!(read_keys(&plain), read_keys(&gz));
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        let output = dir.path().join("out.txt");
        write_lines(&input, &[]);

        let stats = ExternalSorter::new(SortConfig::default())
            .sort(&input, &output, dir.path())
            .unwrap();
        assert_eq!(stats.lines, 0);
        assert!(read_keys(&output).is_empty());
    }

    #[test]
    fn run_files_are_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        let output = dir.path().join("out.txt");
        write_lines(&input, &unsorted_input(200));

        ExternalSorter::new(SortConfig {
            memory_limit_bytes: 256,
            compress: false,
        })
        .sort(&input, &output, dir.path())
        .unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("sort-"))
            .collect();
        assert!(leftovers.is_empty());
    }
}

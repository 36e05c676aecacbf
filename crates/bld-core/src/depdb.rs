//! The dependency database: a line-oriented, append-only per-target file
//! recording a rule's fingerprint plus its resolved input signatures
//! (spec.md §4.7 "Depdb"), used to detect configuration and
//! dynamically-discovered-dependency changes that file mtimes alone
//! cannot.
//!
//! A depdb is read sequentially against the lines a rule's `apply` wants
//! to see; the first line that does not match what is expected switches
//! the database into *write* mode, where every subsequent `expect` call
//! instead overwrites the remainder of the file. This mirrors
//! `libbuild2/depdb.hxx`'s read/write state machine: a depdb that matches
//! its rule's expectations end to end costs one sequential read and no
//! writes; one that has gone stale (a new compiler flag, a changed
//! generated-header list) is rewritten exactly once.

use std::fs;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bld_schema::hash::Sha256Digest;

/// The line a depdb opens with: a fingerprint of the rule plus whatever
/// configuration it considers itself sensitive to (spec.md §4.7).
pub fn format_fingerprint(rule_name: &str, config_hash: Sha256Digest) -> String {
    format!("fingerprint {rule_name} {config_hash}")
}

/// State machine position of a [`DepDb`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Still comparing against lines already on disk.
    Reading,
    /// Past the first mismatch (or past end of file): every further
    /// `expect` appends instead of comparing.
    Writing,
}

/// A dependency database opened for one target (spec.md §4.7).
pub struct DepDb {
    path: PathBuf,
    file: fs::File,
    reader: Option<BufReader<fs::File>>,
    mode: Mode,
    /// `true` if at least one `expect` call found a mismatch — the
    /// caller's signal that the target should be considered changed
    /// regardless of mtime comparison.
    touched: bool,
}

impl DepDb {
    /// Open (creating if absent) the depdb for `path` (conventionally
    /// `<target>.d` next to the target's output).
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if the file cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let existed = path.exists();
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let reader = if existed {
            Some(BufReader::new(file.try_clone()?))
        } else {
            None
        };
        Ok(Self {
            path,
            file,
            reader,
            mode: if existed { Mode::Reading } else { Mode::Writing },
            touched: !existed,
        })
    }

    /// Compare `line` against the next line on disk (while in `Reading`
    /// mode) or append it (once in `Writing` mode, or once the mismatch
    /// happens). Returns `true` if the database was already in sync with
    /// `line` (no write was necessary).
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] on any underlying file operation failure.
    pub fn expect(&mut self, line: &str) -> io::Result<bool> {
        if self.mode == Mode::Reading {
            let mut buf = String::new();
            let read = self
                .reader
                .as_mut()
                .expect("reader present while Reading")
                .read_line(&mut buf)?;
            if read == 0 {
                self.switch_to_writing()?;
            } else {
                let existing = buf.trim_end_matches(['\n', '\r']);
                if existing == line {
                    return Ok(true);
                }
                self.switch_to_writing()?;
            }
        }
        self.write_line(line)?;
        Ok(false)
    }

    fn switch_to_writing(&mut self) -> io::Result<()> {
        // Truncate at the current read position: everything already
        // confirmed to match stays; everything from here on is rewritten.
        let pos = self
            .reader
            .as_mut()
            .map(|r| r.stream_position())
            .transpose()?
            .unwrap_or(0);
        self.file.set_len(pos)?;
        self.file.seek(SeekFrom::Start(pos))?;
        self.reader = None;
        self.mode = Mode::Writing;
        self.touched = true;
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.file, "{line}")
    }

    /// `true` if any line required a rewrite (i.e. the prior depdb
    /// contents did not match what this invocation expected — spec.md
    /// §4.7's "depdb mismatch implies changed").
    pub fn touched(&self) -> bool {
        self.touched
    }

    /// Finish writing: flush to disk and, if still in `Reading` mode
    /// (every line matched and the caller is now at the position it
    /// stopped reading), truncate any leftover trailing lines from a
    /// previous, longer run.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] on flush/truncate failure.
    pub fn close(mut self) -> io::Result<()> {
        if self.mode == Mode::Reading {
            self.switch_to_writing()?;
        }
        self.file.flush()
    }

    /// The path this depdb is backed by.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fresh_depdb_is_touched_and_writes_everything() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.d");
        let mut db = DepDb::open(&path).unwrap();
        assert!(db.touched());
        db.expect("fingerprint rule abc").unwrap();
        db.expect("src/foo.cxx").unwrap();
        db.close().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "fingerprint rule abc\nsrc/foo.cxx\n");
    }

    #[test]
    fn unchanged_inputs_are_not_touched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.d");
        {
            let mut db = DepDb::open(&path).unwrap();
            db.expect("fingerprint rule abc").unwrap();
            db.expect("src/foo.cxx").unwrap();
            db.close().unwrap();
        }
        let mut db = DepDb::open(&path).unwrap();
        let a = db.expect("fingerprint rule abc").unwrap();
        let b = db.expect("src/foo.cxx").unwrap();
        assert!(a && b);
        assert!(!db.touched());
    }

    #[test]
    fn changed_input_switches_to_writing_and_truncates_rest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.d");
        {
            let mut db = DepDb::open(&path).unwrap();
            db.expect("fingerprint rule abc").unwrap();
            db.expect("src/foo.cxx").unwrap();
            db.expect("src/bar.cxx").unwrap();
            db.close().unwrap();
        }
        let mut db = DepDb::open(&path).unwrap();
        assert!(db.expect("fingerprint rule abc").unwrap());
        assert!(!db.expect("src/NEW.cxx").unwrap());
        db.close().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "fingerprint rule abc\nsrc/NEW.cxx\n");
    }
}

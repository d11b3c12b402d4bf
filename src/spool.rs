//! Scoped temporary storage for intermediate streams
//!
//! Every spool file gets a unique random name inside the spool directory and
//! is deleted when dropped, on success and on error paths alike. With
//! cleanup disabled the files stay behind for inspection.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Seek};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::Result;
use crate::record::TabularRecord;

/// Creates spool files in one directory
#[derive(Debug, Clone)]
pub struct Spooler {
    dir: PathBuf,
    keep: bool,
}

impl Spooler {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            keep: false,
        }
    }

    /// Keep spool files after the run (post-mortem inspection)
    pub fn keep_files(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create a new empty spool file named `<label>.<random>.temp`
    pub fn create(&self, label: &str) -> Result<SpoolFile> {
        let file = tempfile::Builder::new()
            .prefix(&format!("{}.", label))
            .suffix(".temp")
            .keep(self.keep)
            .tempfile_in(&self.dir)?;
        debug!(path = %file.path().display(), "Created spool file");
        Ok(SpoolFile {
            file,
            keep: self.keep,
        })
    }
}

/// One spooled stream; deleted on drop unless kept
#[derive(Debug)]
pub struct SpoolFile {
    file: NamedTempFile,
    keep: bool,
}

impl SpoolFile {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn is_kept(&self) -> bool {
        self.keep
    }

    pub fn as_file(&self) -> &File {
        self.file.as_file()
    }

    /// Buffered writer appending at the current position
    pub fn writer(&self) -> BufWriter<&File> {
        BufWriter::new(self.file.as_file())
    }

    /// Position the stream at its start
    pub fn rewind(&self) -> Result<()> {
        let mut file = self.file.as_file();
        file.rewind()?;
        Ok(())
    }

    /// Rewind, then read from the start
    pub fn reader(&self) -> Result<BufReader<&File>> {
        self.rewind()?;
        Ok(BufReader::new(self.file.as_file()))
    }

    /// Rewind, then read the stream back as tabular records
    pub fn records(&self) -> Result<impl Iterator<Item = Result<TabularRecord>> + '_> {
        Ok(self
            .reader()?
            .lines()
            .map(|line| Ok(TabularRecord::from_tsv(&line?))))
    }
}

impl Drop for SpoolFile {
    fn drop(&mut self) {
        if self.keep {
            info!(path = %self.path().display(), "Keeping spool file");
        } else {
            debug!(path = %self.path().display(), "Removing spool file");
        }
    }
}

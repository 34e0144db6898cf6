//! Output routing
//!
//! Reads are written to named streams under an output root. A stream is opened
//! the first time a read is written to it, so runs only produce files for
//! outcomes that actually happened. Names may contain `/` to place a stream in a
//! sub-directory.

use crate::io::{SeqFormat, SeqSink};
use crate::read::Read;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Stream names used by the extractor.
pub mod streams {
    pub const FILTERED_OFF: &str = "filteredOff";
    pub const STAGING_DIR: &str = "unfilteredReads";

    pub fn good(key: &str) -> String {
        key.to_string()
    }

    pub fn bad(key: &str) -> String {
        format!("{}/bad/{}", FILTERED_OFF, key)
    }

    pub fn contamination(key: &str) -> String {
        format!("{}/contamination/{}", FILTERED_OFF, key)
    }

    pub fn unrecognized_primer(bucket: &str) -> String {
        format!("{}/unrecognizedPrimer/{}", FILTERED_OFF, bucket)
    }

    pub fn small_fragments() -> String {
        format!("{}/bad/smallFragments", FILTERED_OFF)
    }

    pub fn starts_with_bad_quality() -> String {
        format!("{}/bad/startsWithBadQual", FILTERED_OFF)
    }

    pub fn unrecognized_barcode() -> String {
        format!("{}/bad/unrecognizedBarcode", FILTERED_OFF)
    }

    pub fn small_read_count(bucket: &str) -> String {
        format!("smallReadCounts/{}", bucket)
    }

    pub fn staged(bucket: &str) -> String {
        format!("{}/byBarcodes/{}", STAGING_DIR, bucket)
    }
}

pub struct OutputRouter {
    root: PathBuf,
    format: SeqFormat,
    sinks: HashMap<String, SeqSink>,
    written: HashMap<String, u64>,
}

impl OutputRouter {
    pub fn new<P: AsRef<Path>>(root: P, format: SeqFormat) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            format,
            sinks: HashMap::new(),
            written: HashMap::new(),
        }
    }

    /// File a stream is written to.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.{}", name, self.format.extension()))
    }

    pub fn write(&mut self, name: &str, read: &Read) -> Result<()> {
        if !self.sinks.contains_key(name) {
            let path = self.path_for(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let sink = SeqSink::create(&path, self.format)?;
            self.sinks.insert(name.to_string(), sink);
        }
        if let Some(sink) = self.sinks.get_mut(name) {
            sink.write_read(read)?;
        }
        *self.written.entry(name.to_string()).or_insert(0) += 1;
        Ok(())
    }

    /// Streams opened so far, sorted.
    pub fn opened(&self) -> Vec<String> {
        let mut names: Vec<String> = self.written.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn written(&self, name: &str) -> u64 {
        self.written.get(name).copied().unwrap_or(0)
    }

    /// Flush and close every open stream.
    pub fn close_all(&mut self) -> Result<()> {
        for (_, mut sink) in self.sinks.drain() {
            sink.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::read_all;

    #[test]
    fn test_streams_open_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let mut router = OutputRouter::new(dir.path(), SeqFormat::Fastq);
        assert!(router.opened().is_empty());
        assert!(!dir.path().join(streams::FILTERED_OFF).exists());

        let read = Read::with_uniform_quality("r1", b"ACGT".to_vec(), 30);
        router.write(&streams::bad("T1MID1"), &read).unwrap();
        router.write(&streams::bad("T1MID1"), &read).unwrap();
        router.write("T1MID1", &read).unwrap();
        router.close_all().unwrap();

        assert_eq!(router.opened(), vec!["T1MID1".to_string(), "filteredOff/bad/T1MID1".to_string()]);
        assert_eq!(router.written("filteredOff/bad/T1MID1"), 2);
        assert_eq!(router.written("never"), 0);

        let bad = read_all(dir.path().join("filteredOff/bad/T1MID1.fastq")).unwrap();
        assert_eq!(bad.len(), 2);
        assert!(dir.path().join("T1MID1.fastq").exists());
    }

    #[test]
    fn test_fasta_streams() {
        let dir = tempfile::tempdir().unwrap();
        let router = OutputRouter::new(dir.path(), SeqFormat::Fasta);
        assert_eq!(
            router.path_for(&streams::staged("MID1")),
            dir.path().join("unfilteredReads/byBarcodes/MID1.fasta")
        );
    }
}

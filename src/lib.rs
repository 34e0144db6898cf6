//! Ampliseq Extract
//!
//! Barcode and primer based extraction of multiplexed amplicon reads.
//!
//! This library provides the pieces of the extractor:
//! - Barcode (MID) demultiplexing with an edit budget
//! - Primer identification by alignment, backed by a persisted alignment cache
//! - The ordered chain of read checks that decides each read's disposition
//! - Routing of reads to lazily opened output streams
//! - Extraction statistics and the tab delimited reports built from them

pub mod alignment;
pub mod barcodes;
pub mod config;
pub mod contamination;
pub mod error;
pub mod filters;
pub mod ids;
pub mod io;
pub mod pipeline;
pub mod primers;
pub mod quality;
pub mod read;
pub mod reporting;
pub mod router;
pub mod stats;

use std::ops::Range;
use std::path::Path;

/// Name given to reads that matched no barcode or no primer.
pub const UNRECOGNIZED: &str = "unrecognized";

/// Outcome of a barcode or primer search.
///
/// A result without a name is a failed match, [`MatchResult::is_match`] is the
/// only thing callers should branch on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub name: Option<String>,
    /// Bases consumed in the read, 0-based.
    pub range: Range<usize>,
    pub edits: u32,
}

impl MatchResult {
    pub fn found(name: impl Into<String>, range: Range<usize>, edits: u32) -> Self {
        Self {
            name: Some(name.into()),
            range,
            edits,
        }
    }

    pub fn unrecognized() -> Self {
        Self {
            name: None,
            range: 0..0,
            edits: 0,
        }
    }

    pub fn is_match(&self) -> bool {
        self.name.is_some()
    }

    /// Matched name, or [`UNRECOGNIZED`].
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(UNRECOGNIZED)
    }
}

/// File stem of an input path, used to label runs.
pub fn sample_name_from_path<P: AsRef<Path>>(path: P) -> String {
    let name = path
        .as_ref()
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");
    let name = name.strip_suffix(".gz").unwrap_or(name);
    name.rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(name)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_result_truthiness() {
        let miss = MatchResult::unrecognized();
        assert!(!miss.is_match());
        assert_eq!(miss.label(), UNRECOGNIZED);
        assert!(miss.range.is_empty());

        let hit = MatchResult::found("MID1", 0..6, 1);
        assert!(hit.is_match());
        assert_eq!(hit.label(), "MID1");
    }

    #[test]
    fn test_sample_name_from_path() {
        assert_eq!(sample_name_from_path("/runs/plate1.fastq.gz"), "plate1");
        assert_eq!(sample_name_from_path("reads.fq"), "reads");
        assert_eq!(sample_name_from_path("noext"), "noext");
    }
}

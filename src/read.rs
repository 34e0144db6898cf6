//! The read record that flows through the extractor
//!
//! Qualities are held as plain Phred scores, the ASCII offset is only applied
//! at the I/O boundary.

use bio::alphabets::dna::revcomp;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Appended to a read name when the barcode was found on the complementary strand.
///
/// It is the only place orientation is recorded once reads have been staged to disk.
pub const COMPLEMENT_SUFFIX: &str = "_Comp";

/// Appended to the name of reads whose reverse primer could not be resolved.
pub const BAD_REVERSE_SUFFIX: &str = "_badReverse";

/// Quality given to every base of a read that came from FASTA.
pub const DEFAULT_FASTA_QUALITY: u8 = 40;

/// Orientation a read was sequenced in, relative to its barcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strand {
    Forward,
    Reverse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Read {
    pub name: String,
    pub seq: Vec<u8>,
    pub qual: Vec<u8>,
}

impl Read {
    /// Create a read, `qual` must hold one Phred score per base.
    pub fn new(name: impl Into<String>, seq: impl Into<Vec<u8>>, qual: impl Into<Vec<u8>>) -> Self {
        let seq = seq.into();
        let qual = qual.into();
        debug_assert_eq!(seq.len(), qual.len());
        Self {
            name: name.into(),
            seq,
            qual,
        }
    }

    /// Create a read with a uniform quality, used for FASTA input and tests.
    pub fn with_uniform_quality(name: impl Into<String>, seq: impl Into<Vec<u8>>, quality: u8) -> Self {
        let seq = seq.into();
        let qual = vec![quality; seq.len()];
        Self {
            name: name.into(),
            seq,
            qual,
        }
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    /// Remove the first `n` bases (or everything if the read is shorter).
    pub fn trim_front(&mut self, n: usize) {
        let n = n.min(self.seq.len());
        self.seq.drain(..n);
        self.qual.drain(..n);
    }

    /// Keep only the first `n` bases.
    pub fn truncate(&mut self, n: usize) {
        self.seq.truncate(n);
        self.qual.truncate(n);
    }

    /// Keep only the bases in `range`, clamped to the read.
    pub fn clip(&mut self, range: Range<usize>) {
        let end = range.end.min(self.seq.len());
        let start = range.start.min(end);
        self.truncate(end);
        self.trim_front(start);
    }

    /// Reverse complement the sequence and reverse the qualities in place.
    pub fn reverse_complement(&mut self) {
        self.seq = revcomp(&self.seq[..]);
        self.qual.reverse();
    }

    pub fn mark_complement(&mut self) {
        if !self.is_complement() {
            self.name.push_str(COMPLEMENT_SUFFIX);
        }
    }

    pub fn is_complement(&self) -> bool {
        self.name.contains(COMPLEMENT_SUFFIX)
    }

    pub fn strand(&self) -> Strand {
        if self.is_complement() {
            Strand::Reverse
        } else {
            Strand::Forward
        }
    }

    /// Name without the complement marker.
    pub fn original_name(&self) -> String {
        self.name.replace(COMPLEMENT_SUFFIX, "")
    }

    /// Count occurrences of `base`, ignoring case.
    pub fn count_base(&self, base: u8) -> usize {
        let base = base.to_ascii_uppercase();
        self.seq
            .iter()
            .filter(|b| b.to_ascii_uppercase() == base)
            .count()
    }
}

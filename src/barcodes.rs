//! Barcode (MID) determination
//!
//! Barcodes are short motifs at the start of a read, optionally repeated as
//! their reverse complement at the end:
//! - Fixed start: the motif is compared against the read prefix
//! - Variable start: the motif may begin anywhere in the first `variable_stop` bases
//! - Complement: reads sequenced from the other strand carry the motif's reverse
//!   complement at their tail, they are flipped and tagged before trimming
//!
//! Distances are Hamming distances with an upper bound; the lowest distance wins
//! and ties go to the barcode declared first.

use crate::ids::Barcode;
use crate::read::Read;
use crate::MatchResult;
use bio::alphabets::dna::revcomp;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarcodeSearch {
    pub max_errors: u32,
    pub variable_start: bool,
    pub variable_stop: usize,
    pub check_complement: bool,
    pub both_ends: bool,
}

impl Default for BarcodeSearch {
    fn default() -> Self {
        Self {
            max_errors: 0,
            variable_start: false,
            variable_stop: 10, // furthest offset searched with a variable start
            check_complement: false,
            both_ends: false,
        }
    }
}

/// Best placement of one barcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Placement {
    index: usize,
    start: usize,
    distance: u32,
}

pub struct BarcodeMatcher {
    barcodes: Vec<Barcode>,
    motifs: Vec<Vec<u8>>,
    rc_motifs: Vec<Vec<u8>>,
    search: BarcodeSearch,
}

impl BarcodeMatcher {
    pub fn new(barcodes: &[Barcode], search: BarcodeSearch) -> Self {
        let motifs: Vec<Vec<u8>> = barcodes
            .iter()
            .map(|b| b.motif.to_ascii_uppercase().into_bytes())
            .collect();
        let rc_motifs = motifs.iter().map(|m| revcomp(&m[..])).collect();
        Self {
            barcodes: barcodes.to_vec(),
            motifs,
            rc_motifs,
            search,
        }
    }

    pub fn barcodes(&self) -> &[Barcode] {
        &self.barcodes
    }

    /// Find the read's barcode and trim it.
    ///
    /// On a complement match the read is reverse complemented and tagged with
    /// [`crate::read::COMPLEMENT_SUFFIX`] before trimming, so the returned range is
    /// relative to the flipped read. An unrecognized read is left untouched.
    pub fn determine(&self, read: &mut Read) -> MatchResult {
        if let Some((placement, tail_start)) = self.leading_match(&read.seq) {
            return self.apply(read, placement, tail_start);
        }

        if self.search.check_complement {
            let flipped = revcomp(&read.seq[..]);
            if let Some((placement, tail_start)) = self.leading_match(&flipped) {
                read.reverse_complement();
                read.mark_complement();
                return self.apply(read, placement, tail_start);
            }
        }

        MatchResult::unrecognized()
    }

    fn apply(&self, read: &mut Read, placement: Placement, tail: Option<(usize, u32)>) -> MatchResult {
        let end = placement.start + self.motifs[placement.index].len();
        let mut edits = placement.distance;
        if let Some((tail_start, tail_distance)) = tail {
            read.truncate(tail_start);
            edits += tail_distance;
        }
        read.trim_front(end);
        MatchResult::found(
            self.barcodes[placement.index].name.clone(),
            placement.start..end,
            edits,
        )
    }

    /// Best barcode at the start of `seq`, plus the position of its reverse
    /// complement at the tail when both ends are required.
    fn leading_match(&self, seq: &[u8]) -> Option<(Placement, Option<(usize, u32)>)> {
        let placement = self.best_leading(seq)?;
        if !self.search.both_ends {
            return Some((placement, None));
        }
        let lead_end = placement.start + self.motifs[placement.index].len();
        let (tail_start, tail_distance) = self.trailing(seq, placement.index)?;
        if tail_start < lead_end {
            return None;
        }
        Some((placement, Some((tail_start, tail_distance))))
    }

    fn max_offset(&self) -> usize {
        if self.search.variable_start {
            self.search.variable_stop
        } else {
            0
        }
    }

    fn best_leading(&self, seq: &[u8]) -> Option<Placement> {
        let mut best: Option<Placement> = None;
        for (index, motif) in self.motifs.iter().enumerate() {
            for start in 0..=self.max_offset() {
                let Some(window) = seq.get(start..start + motif.len()) else {
                    break;
                };
                let Some(distance) = bounded_distance(window, motif, self.search.max_errors) else {
                    continue;
                };
                // strict comparison keeps the first declared barcode and earliest offset on ties
                if best.map_or(true, |b| distance < b.distance) {
                    best = Some(Placement { index, start, distance });
                }
            }
        }
        best
    }

    /// Start of the barcode's reverse complement at the tail of `seq`.
    fn trailing(&self, seq: &[u8], index: usize) -> Option<(usize, u32)> {
        let motif = &self.rc_motifs[index];
        let mut best: Option<(usize, u32)> = None;
        for offset in 0..=self.max_offset() {
            let Some(start) = seq.len().checked_sub(motif.len() + offset) else {
                break;
            };
            let window = &seq[start..start + motif.len()];
            if let Some(distance) = bounded_distance(window, motif, self.search.max_errors) {
                if best.map_or(true, |(_, d)| distance < d) {
                    best = Some((start, distance));
                }
            }
        }
        best
    }
}

/// Hamming distance between a read window and an upper case motif, `None`
/// once it exceeds `max`.
fn bounded_distance(window: &[u8], motif: &[u8], max: u32) -> Option<u32> {
    let mut distance = 0u32;
    for (&base, &expected) in window.iter().zip(motif) {
        if base.to_ascii_uppercase() != expected {
            distance += 1;
            if distance > max {
                return None;
            }
        }
    }
    Some(distance)
}

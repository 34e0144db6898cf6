//! Quality checks on extracted reads
//!
//! Two ways of judging a read's base qualities:
//! - Sliding window: the mean quality of every window must reach a threshold,
//!   optionally trimming the read at the first failing window instead of failing it
//! - Fraction: a minimum fraction of bases must be at or above a quality score
//!
//! Also provides the trim of low quality leading bases applied before
//! demultiplexing.

use crate::filters::{Disposition, ReadCheck, StageResult};
use crate::read::Read;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QualityFilter {
    /// Fail the read when any window's mean quality is below `threshold`.
    Window {
        length: usize,
        step: usize,
        threshold: u8,
    },
    /// Trim the read at the start of the first failing window, failing it only if
    /// it ends up shorter than `min_len`.
    WindowTrim {
        length: usize,
        step: usize,
        threshold: u8,
        min_len: usize,
    },
    /// Fail the read when the fraction of bases with quality >= `quality` is below `cutoff`.
    Fraction { quality: u8, cutoff: f64 },
}

impl Default for QualityFilter {
    fn default() -> Self {
        QualityFilter::Window {
            length: 50, // bases per window
            step: 5,
            threshold: 25,
        }
    }
}

impl QualityFilter {
    /// Column label used in the extraction profile.
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for QualityFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityFilter::Window { .. } | QualityFilter::WindowTrim { .. } => {
                f.write_str("badQualityWindow")
            }
            QualityFilter::Fraction { quality, cutoff } => write!(f, "q{}<{}", quality, cutoff),
        }
    }
}

impl ReadCheck for QualityFilter {
    fn check(&self, read: &mut Read) -> StageResult {
        match *self {
            QualityFilter::Window { length, step, threshold } => {
                if first_failing_window(&read.qual, length, step, threshold).is_some() {
                    return Err(Disposition::QualityFailed);
                }
            }
            QualityFilter::WindowTrim { length, step, threshold, min_len } => {
                if let Some(pos) = first_failing_window(&read.qual, length, step, threshold) {
                    read.truncate(pos);
                    if read.len() < min_len {
                        return Err(Disposition::QualityFailed);
                    }
                }
            }
            QualityFilter::Fraction { quality, cutoff } => {
                if fraction_at_or_above(&read.qual, quality) < cutoff {
                    return Err(Disposition::QualityFailed);
                }
            }
        }
        Ok(())
    }
}

pub fn mean_quality(qualities: &[u8]) -> f64 {
    if qualities.is_empty() {
        return 0.0;
    }
    qualities.iter().map(|&q| q as f64).sum::<f64>() / qualities.len() as f64
}

/// Fraction of scores >= `quality`; 0 for an empty read.
pub fn fraction_at_or_above(qualities: &[u8], quality: u8) -> f64 {
    if qualities.is_empty() {
        return 0.0;
    }
    let passing = qualities.iter().filter(|&&q| q >= quality).count();
    passing as f64 / qualities.len() as f64
}

/// Start of the first window whose mean quality is below `threshold`.
///
/// Reads shorter than one window are judged as a single window. The last
/// window is aligned to the end of the read so trailing bases are always covered.
pub fn first_failing_window(qualities: &[u8], length: usize, step: usize, threshold: u8) -> Option<usize> {
    if qualities.is_empty() {
        return None;
    }
    let length = length.max(1);
    let threshold = threshold as f64;
    if qualities.len() <= length {
        return (mean_quality(qualities) < threshold).then_some(0);
    }

    let mut pos = 0;
    while pos + length <= qualities.len() {
        if mean_quality(&qualities[pos..pos + length]) < threshold {
            return Some(pos);
        }
        pos += step.max(1);
    }
    let last = qualities.len() - length;
    if pos - step.max(1) != last && mean_quality(&qualities[last..]) < threshold {
        return Some(last);
    }
    None
}

/// Drop leading bases scoring below `cutoff`, returning how many were removed.
pub fn trim_leading_low_quality(read: &mut Read, cutoff: u8) -> usize {
    let n = read.qual.iter().take_while(|&&q| q < cutoff).count();
    read.trim_front(n);
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_with(qual: Vec<u8>) -> Read {
        Read::new("r", vec![b'A'; qual.len()], qual)
    }

    #[test]
    fn test_window_passes_and_fails() {
        let filter = QualityFilter::Window { length: 4, step: 2, threshold: 20 };
        let mut good = read_with(vec![30; 12]);
        assert_eq!(filter.check(&mut good), Ok(()));

        let mut dip = read_with(vec![30, 30, 30, 30, 30, 30, 5, 5, 5, 5, 30, 30]);
        assert_eq!(filter.check(&mut dip), Err(Disposition::QualityFailed));
        assert_eq!(dip.len(), 12);
    }

    #[test]
    fn test_failing_window_position() {
        let qual = vec![30, 30, 30, 30, 30, 30, 5, 5, 5, 5, 30, 30];
        assert_eq!(first_failing_window(&qual, 4, 2, 20), Some(4));
        assert_eq!(first_failing_window(&[10, 10], 4, 2, 20), Some(0));
        assert_eq!(first_failing_window(&[], 4, 2, 20), None);
    }

    #[test]
    fn test_tail_window_is_checked() {
        // windows at 0 and 3 with step 3, the tail window starts at 4
        let qual = vec![30, 30, 30, 30, 30, 30, 30, 2, 2];
        assert_eq!(first_failing_window(&qual, 5, 3, 20), Some(4));
    }

    #[test]
    fn test_window_trim_keeps_long_enough_reads() {
        let qual = vec![30, 30, 30, 30, 30, 30, 5, 5, 5, 5, 30, 30];
        let trim = QualityFilter::WindowTrim { length: 4, step: 2, threshold: 20, min_len: 3 };
        let mut r = read_with(qual.clone());
        assert_eq!(trim.check(&mut r), Ok(()));
        assert_eq!(r.len(), 4);

        let strict = QualityFilter::WindowTrim { length: 4, step: 2, threshold: 20, min_len: 8 };
        let mut r = read_with(qual);
        assert_eq!(strict.check(&mut r), Err(Disposition::QualityFailed));
    }

    #[test]
    fn test_fraction_check() {
        let filter = QualityFilter::Fraction { quality: 30, cutoff: 0.75 };
        let mut r = read_with(vec![30, 31, 40, 10]);
        assert_eq!(filter.check(&mut r), Ok(()));
        let mut r = read_with(vec![30, 10, 40, 10]);
        assert_eq!(filter.check(&mut r), Err(Disposition::QualityFailed));
        assert_eq!(filter.label(), "q30<0.75");
    }

    #[test]
    fn test_trim_leading_low_quality() {
        let mut r = read_with(vec![2, 3, 30, 2, 30]);
        assert_eq!(trim_leading_low_quality(&mut r, 10), 2);
        assert_eq!(r.qual, vec![30, 2, 30]);

        let mut all_bad = read_with(vec![2, 2]);
        trim_leading_low_quality(&mut all_bad, 10);
        assert!(all_bad.is_empty());
    }
}

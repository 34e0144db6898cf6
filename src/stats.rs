//! Extraction statistics
//!
//! Counts every read exactly once: either in one of the run wide counters
//! (barcode failures, prefilters, undersized buckets) or under the sample key and
//! disposition it was classified with. Workers keep their own stats which are
//! merged at the end.

use crate::filters::Disposition;
use crate::read::Strand;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A target within a sample, shown as `<target><sample>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SampleKey {
    pub target: String,
    pub sample: String,
}

impl SampleKey {
    pub fn new(target: impl Into<String>, sample: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            sample: sample.into(),
        }
    }
}

impl fmt::Display for SampleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.target, self.sample)
    }
}

/// Per sample key counts of everything that got past primer identification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispositionCounts {
    pub good_forward: u64,
    pub good_reverse: u64,
    pub min_len_bad: u64,
    pub max_len_bad: u64,
    pub bad_reverse: u64,
    pub contains_ns: u64,
    pub quality_failed: u64,
    pub contamination: u64,
}

impl DispositionCounts {
    fn add(&mut self, disposition: Disposition, strand: Strand) {
        match disposition {
            Disposition::Good => match strand {
                Strand::Forward => self.good_forward += 1,
                Strand::Reverse => self.good_reverse += 1,
            },
            Disposition::MinLenBad => self.min_len_bad += 1,
            Disposition::MaxLenBad => self.max_len_bad += 1,
            Disposition::BadReverse => self.bad_reverse += 1,
            Disposition::ContainsNs => self.contains_ns += 1,
            Disposition::QualityFailed => self.quality_failed += 1,
            Disposition::Contamination => self.contamination += 1,
            Disposition::UnrecognizedBarcode | Disposition::UnrecognizedPrimer => {}
        }
    }

    fn merge(&mut self, other: &DispositionCounts) {
        self.good_forward += other.good_forward;
        self.good_reverse += other.good_reverse;
        self.min_len_bad += other.min_len_bad;
        self.max_len_bad += other.max_len_bad;
        self.bad_reverse += other.bad_reverse;
        self.contains_ns += other.contains_ns;
        self.quality_failed += other.quality_failed;
        self.contamination += other.contamination;
    }

    pub fn good(&self) -> u64 {
        self.good_forward + self.good_reverse
    }

    /// Reads that failed a length, reverse primer, N or quality check.
    pub fn bad(&self) -> u64 {
        self.min_len_bad + self.max_len_bad + self.bad_reverse + self.contains_ns + self.quality_failed
    }

    pub fn total(&self) -> u64 {
        self.good() + self.bad() + self.contamination
    }
}

/// Reads of one bucket whose forward primer was not found, by strand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedForward {
    pub forward: u64,
    pub reverse: u64,
}

impl FailedForward {
    pub fn total(&self) -> u64 {
        self.forward + self.reverse
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_reads: u64,
    pub unmatched_barcode: u64,
    pub small_fragments: u64,
    pub bad_start_quality: u64,
    pub small_bucket_reads: u64,
    /// Keyed by the displayed sample key.
    pub per_key: BTreeMap<String, DispositionCounts>,
    /// Keyed by bucket (barcode name, or `all`).
    pub failed_forward: BTreeMap<String, FailedForward>,
}

impl ExtractionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_total(&mut self) {
        self.total_reads += 1;
    }

    pub fn record_small_fragment(&mut self) {
        self.small_fragments += 1;
    }

    pub fn record_bad_start_quality(&mut self) {
        self.bad_start_quality += 1;
    }

    pub fn record_unmatched_barcode(&mut self) {
        self.unmatched_barcode += 1;
    }

    pub fn record_small_bucket(&mut self, reads: u64) {
        self.small_bucket_reads += reads;
    }

    /// Count a classified read.
    ///
    /// For [`Disposition::UnrecognizedPrimer`] the key's sample is the bucket name.
    pub fn record_disposition(&mut self, key: &SampleKey, disposition: Disposition, strand: Strand) {
        match disposition {
            Disposition::UnrecognizedBarcode => self.unmatched_barcode += 1,
            Disposition::UnrecognizedPrimer => {
                let failed = self.failed_forward.entry(key.sample.clone()).or_default();
                match strand {
                    Strand::Forward => failed.forward += 1,
                    Strand::Reverse => failed.reverse += 1,
                }
            }
            _ => self
                .per_key
                .entry(key.to_string())
                .or_default()
                .add(disposition, strand),
        }
    }

    pub fn merge(&mut self, other: &ExtractionStats) {
        self.total_reads += other.total_reads;
        self.unmatched_barcode += other.unmatched_barcode;
        self.small_fragments += other.small_fragments;
        self.bad_start_quality += other.bad_start_quality;
        self.small_bucket_reads += other.small_bucket_reads;
        for (key, counts) in &other.per_key {
            self.per_key.entry(key.clone()).or_default().merge(counts);
        }
        for (bucket, failed) in &other.failed_forward {
            let entry = self.failed_forward.entry(bucket.clone()).or_default();
            entry.forward += failed.forward;
            entry.reverse += failed.reverse;
        }
    }

    pub fn good(&self) -> u64 {
        self.per_key.values().map(|c| c.good()).sum()
    }

    pub fn failed_filtering(&self) -> u64 {
        self.per_key.values().map(|c| c.bad()).sum()
    }

    pub fn contamination(&self) -> u64 {
        self.per_key.values().map(|c| c.contamination).sum()
    }

    pub fn failed_forward_total(&self) -> u64 {
        self.failed_forward.values().map(|f| f.total()).sum()
    }

    /// Reads given some outcome, equal to `total_reads` once a run is complete.
    pub fn accounted_reads(&self) -> u64 {
        self.unmatched_barcode
            + self.small_fragments
            + self.bad_start_quality
            + self.small_bucket_reads
            + self.failed_forward_total()
            + self.per_key.values().map(|c| c.total()).sum::<u64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_account() {
        let mut stats = ExtractionStats::new();
        let key = SampleKey::new("T1", "MID1");
        for _ in 0..6 {
            stats.record_total();
        }
        stats.record_disposition(&key, Disposition::Good, Strand::Forward);
        stats.record_disposition(&key, Disposition::Good, Strand::Reverse);
        stats.record_disposition(&key, Disposition::MinLenBad, Strand::Forward);
        stats.record_disposition(&key, Disposition::Contamination, Strand::Forward);
        stats.record_disposition(&SampleKey::new("unrecognized", "MID1"), Disposition::UnrecognizedPrimer, Strand::Reverse);
        stats.record_unmatched_barcode();

        let counts = &stats.per_key["T1MID1"];
        assert_eq!(counts.good(), 2);
        assert_eq!(counts.bad(), 1);
        assert_eq!(counts.total(), 4);
        assert_eq!(stats.failed_forward["MID1"], FailedForward { forward: 0, reverse: 1 });
        assert_eq!(stats.accounted_reads(), stats.total_reads);
    }

    #[test]
    fn test_merge() {
        let key = SampleKey::new("T1", "MID1");
        let mut a = ExtractionStats::new();
        a.record_total();
        a.record_disposition(&key, Disposition::Good, Strand::Forward);
        let mut b = ExtractionStats::new();
        b.record_total();
        b.record_total();
        b.record_disposition(&key, Disposition::BadReverse, Strand::Forward);
        b.record_small_bucket(1);

        a.merge(&b);
        assert_eq!(a.total_reads, 3);
        assert_eq!(a.per_key["T1MID1"].good_forward, 1);
        assert_eq!(a.per_key["T1MID1"].bad_reverse, 1);
        assert_eq!(a.accounted_reads(), 3);
    }
}

//! Extraction reports
//!
//! Writes the tab delimited tables summarizing a run:
//! - `extractionProfile.tab.txt`: per sample key counts of every disposition
//! - `extractionStats.tab.txt`: one line of run totals
//! - `failedForward.tab.txt`: per bucket reads without a forward primer
//! - `renameKey.tab.txt`: original to new read names when renaming is on

use crate::stats::ExtractionStats;
use anyhow::{Context, Result};
use csv::WriterBuilder;
use std::fs::File;
use std::path::Path;

pub const PROFILE_FILE: &str = "extractionProfile.tab.txt";
pub const SUMMARY_FILE: &str = "extractionStats.tab.txt";
pub const FAILED_FORWARD_FILE: &str = "failedForward.tab.txt";
pub const RENAME_KEY_FILE: &str = "renameKey.tab.txt";
pub const STATS_JSON_FILE: &str = "extractionStats.json";

/// Report writer, holds the cutoffs that appear in column headers.
pub struct ExtractionReporter {
    pub min_len: usize,
    pub max_len: usize,
    pub small_fragment_cutoff: usize,
    /// Header of the quality failure column.
    pub quality_label: String,
}

impl Default for ExtractionReporter {
    fn default() -> Self {
        Self {
            min_len: 200,
            max_len: 400,
            small_fragment_cutoff: 50,
            quality_label: "badQualityWindow".to_string(),
        }
    }
}

fn tab_writer(path: &Path) -> Result<csv::Writer<File>> {
    WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))
}

impl ExtractionReporter {
    pub fn new(min_len: usize, max_len: usize, small_fragment_cutoff: usize, quality_label: String) -> Self {
        Self {
            min_len,
            max_len,
            small_fragment_cutoff,
            quality_label,
        }
    }

    pub fn write_profile<P: AsRef<Path>>(&self, stats: &ExtractionStats, path: P) -> Result<()> {
        let mut writer = tab_writer(path.as_ref())?;
        let min_col = format!("len<{}", self.min_len);
        let max_col = format!("len>{}", self.max_len);
        writer.write_record([
            "name",
            "totalReadsExtracted",
            "goodReadsExtracted",
            "forGood",
            "revGood",
            "totalBadReads",
            "badReverse",
            "containsNs",
            min_col.as_str(),
            max_col.as_str(),
            self.quality_label.as_str(),
            "contamination",
        ])?;
        for (name, counts) in &stats.per_key {
            writer.write_record([
                name.clone(),
                counts.total().to_string(),
                counts.good().to_string(),
                counts.good_forward.to_string(),
                counts.good_reverse.to_string(),
                counts.bad().to_string(),
                counts.bad_reverse.to_string(),
                counts.contains_ns.to_string(),
                counts.min_len_bad.to_string(),
                counts.max_len_bad.to_string(),
                counts.quality_failed.to_string(),
                counts.contamination.to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_summary<P: AsRef<Path>>(&self, stats: &ExtractionStats, path: P) -> Result<()> {
        let mut writer = tab_writer(path.as_ref())?;
        let small_col = format!("SmallFragments(len<{})", self.small_fragment_cutoff);
        writer.write_record([
            "TotalReads",
            "ReadsNotMatchedBarcodes",
            small_col.as_str(),
            "startsWithBadQual",
            "smallReadCounts",
            "failedForwardPrimer",
            "failedQualityFiltering",
            "used",
            "contamination",
        ])?;
        writer.write_record([
            stats.total_reads.to_string(),
            stats.unmatched_barcode.to_string(),
            stats.small_fragments.to_string(),
            stats.bad_start_quality.to_string(),
            stats.small_bucket_reads.to_string(),
            stats.failed_forward_total().to_string(),
            stats.failed_filtering().to_string(),
            stats.good().to_string(),
            stats.contamination().to_string(),
        ])?;
        writer.flush()?;
        Ok(())
    }

    pub fn write_failed_forward<P: AsRef<Path>>(&self, stats: &ExtractionStats, path: P) -> Result<()> {
        let mut writer = tab_writer(path.as_ref())?;
        writer.write_record(["MidName", "totalFailed", "failedInFor", "failedInRev"])?;
        for (bucket, failed) in &stats.failed_forward {
            writer.write_record([
                bucket.clone(),
                failed.total().to_string(),
                failed.forward.to_string(),
                failed.reverse.to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_rename_key<P: AsRef<Path>>(&self, renames: &[(String, String)], path: P) -> Result<()> {
        let mut writer = tab_writer(path.as_ref())?;
        writer.write_record(["originalName", "newName"])?;
        for (original, renamed) in renames {
            writer.write_record([original, renamed])?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Export the raw counters to JSON
    pub fn export_json<P: AsRef<Path>>(&self, stats: &ExtractionStats, path: P) -> Result<()> {
        let json_content = serde_json::to_string_pretty(stats)?;
        std::fs::write(path, json_content)?;
        Ok(())
    }

    /// Write every report into `dir`, the rename key only when there are renames.
    pub fn write_all<P: AsRef<Path>>(
        &self,
        stats: &ExtractionStats,
        renames: &[(String, String)],
        dir: P,
    ) -> Result<()> {
        let dir = dir.as_ref();
        self.write_profile(stats, dir.join(PROFILE_FILE))?;
        self.write_summary(stats, dir.join(SUMMARY_FILE))?;
        self.write_failed_forward(stats, dir.join(FAILED_FORWARD_FILE))?;
        if !renames.is_empty() {
            self.write_rename_key(renames, dir.join(RENAME_KEY_FILE))?;
        }
        self.export_json(stats, dir.join(STATS_JSON_FILE))?;
        Ok(())
    }
}

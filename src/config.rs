//! Run parameters
//!
//! Everything the extractor is configured with, grouped by the stage that uses
//! it. Parameters serialize to JSON so each run can record what it was run with.

use crate::alignment::ScoringParams;
use crate::barcodes::BarcodeSearch;
use crate::contamination::ContaminationParams;
use crate::error::ConfigError;
use crate::ids::IdTable;
use crate::primers::PrimerSearch;
use crate::quality::QualityFilter;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const PARAMETERS_FILE: &str = "parametersUsed.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LengthParams {
    pub min_len: usize,
    pub max_len: usize,
    /// Raw reads shorter than this are dropped before demultiplexing.
    pub small_fragment_cutoff: usize,
    /// Optional per target cut offs, used when there are several targets.
    pub cutoffs_file: Option<PathBuf>,
}

impl Default for LengthParams {
    fn default() -> Self {
        Self {
            min_len: 200,
            max_len: 400,
            small_fragment_cutoff: 50,
            cutoffs_file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputParams {
    pub out_dir: PathBuf,
    /// Rename good reads to `<sample key>.<index>`.
    pub rename: bool,
    /// Sample name used in keys when reads are not multiplexed.
    pub sample_name: Option<String>,
    /// Keep the staged per barcode files.
    pub debug: bool,
    /// Buckets with at most `small_read_count` reads are set aside unfiltered.
    pub filter_small_read_counts: bool,
    pub small_read_count: u64,
}

impl Default for OutputParams {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("extraction"),
            rename: false,
            sample_name: None,
            debug: false,
            filter_small_read_counts: false,
            small_read_count: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorParams {
    pub input: PathBuf,
    pub id_file: PathBuf,
    pub multiplex: bool,
    /// Several targets are amplified in each sample.
    pub multiple_targets: bool,
    pub no_forward_primer: bool,
    pub no_reverse_primer: bool,
    pub max_ns: usize,
    /// Trim leading bases below this quality before demultiplexing.
    pub trim_at_quality: Option<u8>,
    pub barcodes: BarcodeSearch,
    pub primers: PrimerSearch,
    pub scoring: ScoringParams,
    pub lengths: LengthParams,
    pub quality: QualityFilter,
    pub contamination: ContaminationParams,
    pub output: OutputParams,
    /// Alignment cache loaded at start, and persisted at the end unless
    /// `alignment_cache_out` is given.
    pub alignment_cache: Option<PathBuf>,
    pub alignment_cache_out: Option<PathBuf>,
    pub threads: usize,
}

impl Default for ExtractorParams {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            id_file: PathBuf::new(),
            multiplex: false,
            multiple_targets: false,
            no_forward_primer: false,
            no_reverse_primer: false,
            max_ns: 0,
            trim_at_quality: None,
            barcodes: BarcodeSearch::default(),
            primers: PrimerSearch::default(),
            scoring: ScoringParams::default(),
            lengths: LengthParams::default(),
            quality: QualityFilter::default(),
            contamination: ContaminationParams::default(),
            output: OutputParams::default(),
            alignment_cache: None,
            alignment_cache_out: None,
            threads: 1,
        }
    }
}

impl ExtractorParams {
    pub fn new(input: PathBuf, id_file: PathBuf, out_dir: PathBuf) -> Self {
        Self {
            input,
            id_file,
            output: OutputParams {
                out_dir,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Checks that can only be made against the id table.
    pub fn validate(&self, ids: &IdTable) -> Result<(), ConfigError> {
        if ids.targets().is_empty() {
            return Err(ConfigError::NoTargets);
        }
        if self.multiplex && !ids.contains_barcodes() {
            return Err(ConfigError::NoBarcodes);
        }
        if self.no_forward_primer && ids.targets().len() != 1 {
            return Err(ConfigError::AmbiguousNoForwardPrimer {
                count: ids.targets().len(),
                targets: ids.target_names().join(", "),
            });
        }
        Ok(())
    }

    /// Where the alignment cache is written at the end of a run.
    pub fn cache_destination(&self) -> Option<&Path> {
        self.alignment_cache_out
            .as_deref()
            .or(self.alignment_cache.as_deref())
    }

    /// Sample name used in keys of non multiplexed runs.
    pub fn sample_name(&self) -> String {
        self.output
            .sample_name
            .clone()
            .unwrap_or_else(|| crate::sample_name_from_path(&self.input))
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json_content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json_content)?;
        Ok(())
    }
}

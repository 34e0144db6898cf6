//! Contamination screening
//!
//! Reads are compared to expected or contaminating sequences by k-mer profile:
//! - Similarity is the number of shared k-mers (counting multiplicity) over the
//!   k-mer total of the smaller of the two sequences
//! - Profiles can be one global sequence, one sequence per target, or any of a set
//! - In contaminant mode a read similar to a profile is flagged; in reference mode a
//!   read similar to none of its references is flagged
//!
//! Reads still in reverse orientation are compared against reverse complemented
//! profiles.

use crate::error::ConfigError;
use crate::filters::{Disposition, StageResult};
use crate::ids::IdTable;
use crate::io::read_all;
use crate::read::Read;
use anyhow::Result;
use bio::alphabets::dna::revcomp;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// How similarity to a profile is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenMode {
    /// Profiles are contaminants, similar reads are flagged.
    #[default]
    Contaminant,
    /// Profiles are the expected sequences, dissimilar reads are flagged.
    Reference,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmerProfile {
    pub name: String,
    k: usize,
    counts: HashMap<Vec<u8>, u32>,
    total: u32,
}

impl KmerProfile {
    pub fn new(name: impl Into<String>, seq: &[u8], k: usize) -> Self {
        let k = k.max(1);
        let mut counts: HashMap<Vec<u8>, u32> = HashMap::new();
        let mut total = 0;
        if seq.len() >= k {
            for kmer in seq.windows(k) {
                *counts.entry(kmer.to_ascii_uppercase()).or_insert(0) += 1;
                total += 1;
            }
        }
        Self {
            name: name.into(),
            k,
            counts,
            total,
        }
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    /// Shared k-mers over the smaller k-mer total, 0 if either is empty or the
    /// profiles were built with different k.
    pub fn similarity(&self, other: &KmerProfile) -> f64 {
        let denom = self.total.min(other.total);
        if denom == 0 || self.k != other.k {
            return 0.0;
        }
        let (small, large) = if self.counts.len() <= other.counts.len() {
            (self, other)
        } else {
            (other, self)
        };
        let shared: u32 = small
            .counts
            .iter()
            .filter_map(|(kmer, &n)| large.counts.get(kmer).map(|&m| n.min(m)))
            .sum();
        shared as f64 / denom as f64
    }
}

/// A profile and its reverse complement.
#[derive(Debug, Clone)]
struct OrientedProfile {
    forward: KmerProfile,
    reverse: KmerProfile,
}

impl OrientedProfile {
    fn new(name: &str, seq: &[u8], k: usize) -> Self {
        Self {
            forward: KmerProfile::new(name, seq, k),
            reverse: KmerProfile::new(name, &revcomp(seq), k),
        }
    }

    fn oriented(&self, found_in_reverse: bool) -> &KmerProfile {
        if found_in_reverse {
            &self.reverse
        } else {
            &self.forward
        }
    }
}

#[derive(Debug, Clone)]
enum ProfileSet {
    Global(OrientedProfile),
    PerTarget(HashMap<String, OrientedProfile>),
    AnyOf(Vec<OrientedProfile>),
}

pub struct ContaminationScreener {
    profiles: ProfileSet,
    kmer_len: usize,
    cutoff: f64,
    mode: ScreenMode,
}

impl ContaminationScreener {
    pub fn global(name: &str, seq: &[u8], kmer_len: usize, cutoff: f64, mode: ScreenMode) -> Self {
        Self {
            profiles: ProfileSet::Global(OrientedProfile::new(name, seq, kmer_len)),
            kmer_len,
            cutoff,
            mode,
        }
    }

    pub fn any_of(refs: &[Read], kmer_len: usize, cutoff: f64, mode: ScreenMode) -> Self {
        let profiles = refs
            .iter()
            .map(|r| OrientedProfile::new(&r.name, &r.seq, kmer_len))
            .collect();
        Self {
            profiles: ProfileSet::AnyOf(profiles),
            kmer_len,
            cutoff,
            mode,
        }
    }

    /// One profile per target, matched by record name. Every target must have one.
    pub fn per_target(
        refs: &[Read],
        targets: &[String],
        kmer_len: usize,
        cutoff: f64,
        mode: ScreenMode,
    ) -> Result<Self, ConfigError> {
        let profiles: HashMap<String, OrientedProfile> = refs
            .iter()
            .map(|r| (r.name.clone(), OrientedProfile::new(&r.name, &r.seq, kmer_len)))
            .collect();
        for target in targets {
            if !profiles.contains_key(target) {
                let mut available: Vec<&str> = profiles.keys().map(|k| k.as_str()).collect();
                available.sort_unstable();
                return Err(ConfigError::MissingContaminationProfile {
                    target: target.clone(),
                    available: available.join(", "),
                });
            }
        }
        Ok(Self {
            profiles: ProfileSet::PerTarget(profiles),
            kmer_len,
            cutoff,
            mode,
        })
    }

    /// Screen a read extracted for `target`.
    pub fn check(&self, read: &Read, target: &str, found_in_reverse: bool) -> StageResult {
        let profile = KmerProfile::new(&read.name, &read.seq, self.kmer_len);
        let similar = |p: &OrientedProfile| p.oriented(found_in_reverse).similarity(&profile) >= self.cutoff;

        let matched = match &self.profiles {
            ProfileSet::Global(p) => similar(p),
            // every configured target has a profile, see `per_target`
            ProfileSet::PerTarget(map) => match map.get(target) {
                Some(p) => similar(p),
                None => return Ok(()),
            },
            ProfileSet::AnyOf(list) => list.iter().any(similar),
        };

        let flagged = match self.mode {
            ScreenMode::Contaminant => matched,
            ScreenMode::Reference => !matched,
        };
        if flagged {
            Err(Disposition::Contamination)
        } else {
            Ok(())
        }
    }
}

/// Settings for contamination screening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContaminationParams {
    /// Single sequence to screen against.
    pub compare_seq: Option<String>,
    /// FASTA/FASTQ of sequences to screen against.
    pub compare_file: Option<PathBuf>,
    pub kmer_len: usize,
    /// Minimum similarity for a read to count as similar.
    pub cutoff: f64,
    /// Use every record of `compare_file` rather than only the first.
    pub multiple_compare: bool,
    pub mode: ScreenMode,
}

impl Default for ContaminationParams {
    fn default() -> Self {
        Self {
            compare_seq: None,
            compare_file: None,
            kmer_len: 5,
            cutoff: 0.8,
            multiple_compare: false,
            mode: ScreenMode::default(),
        }
    }
}

impl ContaminationParams {
    pub fn enabled(&self) -> bool {
        self.compare_seq.is_some() || self.compare_file.is_some()
    }

    /// Build the screener for a run, `None` when screening is off.
    ///
    /// With several targets the file must name one record per target. A
    /// missing file disables screening with a warning.
    pub fn build(&self, ids: &IdTable, multiple_targets: bool) -> Result<Option<ContaminationScreener>> {
        if let Some(path) = &self.compare_file {
            if !path.exists() {
                warn!(
                    "Contamination file {} does not exist, screening is disabled",
                    path.display()
                );
                return Ok(None);
            }
            let refs = read_all(path)?;
            if refs.is_empty() {
                warn!("Contamination file {} has no records, screening is disabled", path.display());
                return Ok(None);
            }
            info!("Screening against {} sequences from {}", refs.len(), path.display());
            let screener = if multiple_targets {
                ContaminationScreener::per_target(&refs, &ids.target_names(), self.kmer_len, self.cutoff, self.mode)?
            } else if self.multiple_compare {
                ContaminationScreener::any_of(&refs, self.kmer_len, self.cutoff, self.mode)
            } else {
                ContaminationScreener::global(&refs[0].name, &refs[0].seq, self.kmer_len, self.cutoff, self.mode)
            };
            return Ok(Some(screener));
        }

        Ok(self.compare_seq.as_ref().map(|seq| {
            ContaminationScreener::global("compareSeq", seq.as_bytes(), self.kmer_len, self.cutoff, self.mode)
        }))
    }
}

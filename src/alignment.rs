//! Primer alignment and the alignment cache
//!
//! Primers are aligned semi-globally against a window of the read: every primer
//! base takes part in the alignment while the read window may be clipped freely.
//! An alignment is reduced to an [`AlignmentProfile`] (score, placement, mismatch
//! and gap counts), which is all the primer matcher needs to judge it.
//!
//! Profiles are memoized by the content of the (primer, window) pair in an
//! [`AlignmentCache`] shared by all workers. The cache can be loaded from and
//! persisted to a JSON file so repeated runs skip alignments already made.

use anyhow::{Context, Result};
use bio::alignment::pairwise::{Aligner, MatchFunc};
use bio::alignment::{Alignment, AlignmentOperation};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// Reads longer than this get an aligner sized from the primers instead.
const LONG_READ_LEN: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScoringParams {
    pub match_score: i32,
    pub mismatch_score: i32,
    /// Penalty for opening a gap, a gap of length k costs `gap_open + k * gap_extend`.
    pub gap_open: i32,
    pub gap_extend: i32,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            match_score: 2,
            mismatch_score: -2,
            gap_open: -7,
            gap_extend: -1,
        }
    }
}

impl ScoringParams {
    /// Identifies cache files made with the same scoring.
    pub fn signature(&self) -> String {
        format!(
            "degenerate:m{}:mm{}:go{}:ge{}",
            self.match_score, self.mismatch_score, self.gap_open, self.gap_extend
        )
    }
}

fn iupac_mask(base: u8) -> u8 {
    match base {
        b'A' => 0b0001,
        b'C' => 0b0010,
        b'G' => 0b0100,
        b'T' | b'U' => 0b1000,
        b'R' => 0b0101,
        b'Y' => 0b1010,
        b'S' => 0b0110,
        b'W' => 0b1001,
        b'K' => 0b1100,
        b'M' => 0b0011,
        b'B' => 0b1110,
        b'D' => 0b1101,
        b'H' => 0b1011,
        b'V' => 0b0111,
        b'N' => 0b1111,
        _ => 0,
    }
}

/// Whether a read base satisfies a (possibly degenerate) primer base.
///
/// Only upper case A, C, G and T in the read can match; an `N` or a lower case
/// base in the read is always a mismatch.
pub fn primer_base_matches(primer: u8, read: u8) -> bool {
    let read_mask = match read {
        b'A' | b'C' | b'G' | b'T' => iupac_mask(read),
        _ => 0,
    };
    read_mask & iupac_mask(primer) != 0
}

/// Match function that understands IUPAC codes in the primer.
#[derive(Debug, Clone, Copy)]
pub struct DegenerateMatch {
    pub match_score: i32,
    pub mismatch_score: i32,
}

impl MatchFunc for DegenerateMatch {
    fn score(&self, a: u8, b: u8) -> i32 {
        if primer_base_matches(a, b) {
            self.match_score
        } else {
            self.mismatch_score
        }
    }
}

/// What the primer matcher keeps of an alignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentProfile {
    pub score: i32,
    pub query_len: usize,
    /// Aligned span in the target window.
    pub target_start: usize,
    pub target_end: usize,
    pub mismatches: u32,
    /// Lengths of gap runs between aligned bases.
    pub gaps: Vec<u32>,
    /// Primer bases hanging off the start and end of the window.
    pub leading_gap: u32,
    pub trailing_gap: u32,
}

impl AlignmentProfile {
    /// Profile of a primer that could not be placed at all.
    pub fn unaligned(query_len: usize) -> Self {
        Self {
            score: 0,
            query_len,
            target_start: 0,
            target_end: 0,
            mismatches: 0,
            gaps: Vec::new(),
            leading_gap: query_len as u32,
            trailing_gap: 0,
        }
    }

    pub fn from_alignment(alignment: &Alignment, query: &[u8], target: &[u8]) -> Self {
        let mut x = alignment.xstart;
        let mut y = alignment.ystart;
        let mut mismatches = 0;
        let mut gaps = Vec::new();
        let mut leading_gap = alignment.xstart as u32;
        let mut seen_aligned = false;
        // (is_insertion, length) of the gap run in progress
        let mut run: Option<(bool, u32)> = None;

        for op in &alignment.operations {
            match op {
                AlignmentOperation::Match | AlignmentOperation::Subst => {
                    if let Some((_, len)) = run.take() {
                        if seen_aligned {
                            gaps.push(len);
                        } else {
                            leading_gap += len;
                        }
                    }
                    if !primer_base_matches(query[x], target[y]) {
                        mismatches += 1;
                    }
                    seen_aligned = true;
                    x += 1;
                    y += 1;
                }
                AlignmentOperation::Ins | AlignmentOperation::Del => {
                    let insertion = matches!(op, AlignmentOperation::Ins);
                    run = match run {
                        Some((kind, len)) if kind == insertion => Some((kind, len + 1)),
                        Some((_, len)) => {
                            if seen_aligned {
                                gaps.push(len);
                            } else {
                                leading_gap += len;
                            }
                            Some((insertion, 1))
                        }
                        None => Some((insertion, 1)),
                    };
                    if insertion {
                        x += 1;
                    } else {
                        y += 1;
                    }
                }
                AlignmentOperation::Xclip(_) | AlignmentOperation::Yclip(_) => {}
            }
        }

        let pending = run.map(|(_, len)| len).unwrap_or(0);
        let trailing_gap = pending + query.len().saturating_sub(x) as u32;
        if !seen_aligned {
            return Self::unaligned(query.len());
        }

        Self {
            score: alignment.score,
            query_len: query.len(),
            target_start: alignment.ystart,
            target_end: y,
            mismatches,
            gaps,
            leading_gap,
            trailing_gap,
        }
    }

    fn end_gaps(&self) -> impl Iterator<Item = u32> {
        [self.leading_gap, self.trailing_gap].into_iter().filter(|&g| g > 0)
    }

    /// Fraction of primer bases placed against the window.
    pub fn coverage(&self) -> f64 {
        if self.query_len == 0 {
            return 0.0;
        }
        let hanging = (self.leading_gap + self.trailing_gap) as usize;
        self.query_len.saturating_sub(hanging) as f64 / self.query_len as f64
    }
}

/// Error budget for accepting a primer alignment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllowableErrors {
    pub mismatches: u32,
    pub one_base_indels: u32,
    pub two_base_indels: u32,
    pub large_base_indels: u32,
    /// Minimum primer coverage when end gaps are not counted as indels.
    pub min_coverage: f64,
}

impl Default for AllowableErrors {
    fn default() -> Self {
        Self {
            mismatches: 2,
            one_base_indels: 1,
            two_base_indels: 0,
            large_base_indels: 0,
            min_coverage: 0.9,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct IndelTally {
    one: u32,
    two: u32,
    large: u32,
}

impl AllowableErrors {
    fn tally(profile: &AlignmentProfile, count_end_gaps: bool) -> IndelTally {
        let mut tally = IndelTally::default();
        let end_gaps: Vec<u32> = if count_end_gaps {
            profile.end_gaps().collect()
        } else {
            Vec::new()
        };
        for len in profile.gaps.iter().copied().chain(end_gaps) {
            match len {
                1 => tally.one += 1,
                2 => tally.two += 1,
                _ => tally.large += 1,
            }
        }
        tally
    }

    pub fn passes(&self, profile: &AlignmentProfile, count_end_gaps: bool) -> bool {
        let tally = Self::tally(profile, count_end_gaps);
        profile.mismatches <= self.mismatches
            && tally.one <= self.one_base_indels
            && tally.two <= self.two_base_indels
            && tally.large <= self.large_base_indels
            && (count_end_gaps || profile.coverage() >= self.min_coverage)
    }

    /// Mismatches plus gap runs, used to rank passing alignments.
    pub fn error_count(profile: &AlignmentProfile, count_end_gaps: bool) -> u32 {
        let tally = Self::tally(profile, count_end_gaps);
        profile.mismatches + tally.one + tally.two + tally.large
    }

    /// Extra window bases needed to fit the indels this budget allows.
    pub fn indel_slack(&self) -> usize {
        (self.one_base_indels + 2 * self.two_base_indels + 3 * self.large_base_indels) as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlignmentKey {
    pub query: String,
    pub target: String,
}

impl AlignmentKey {
    pub fn new(query: &[u8], target: &[u8]) -> Self {
        Self {
            query: String::from_utf8_lossy(query).into_owned(),
            target: String::from_utf8_lossy(target).into_owned(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    #[serde(flatten)]
    key: AlignmentKey,
    profile: AlignmentProfile,
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    scoring: String,
    entries: Vec<CacheEntry>,
}

/// Memo of alignment profiles keyed by sequence content.
pub struct AlignmentCache {
    signature: String,
    entries: RwLock<HashMap<AlignmentKey, AlignmentProfile>>,
    loaded: usize,
    hits: AtomicU64,
    computed: AtomicU64,
}

impl AlignmentCache {
    pub fn new(scoring: &ScoringParams) -> Self {
        Self {
            signature: scoring.signature(),
            entries: RwLock::new(HashMap::new()),
            loaded: 0,
            hits: AtomicU64::new(0),
            computed: AtomicU64::new(0),
        }
    }

    /// Load a persisted cache.
    ///
    /// A missing or unreadable file, or one written with different scoring, is
    /// ignored with a warning and an empty cache is returned.
    pub fn load<P: AsRef<Path>>(path: P, scoring: &ScoringParams) -> Self {
        let path = path.as_ref();
        let mut cache = Self::new(scoring);
        if !path.exists() {
            info!("No alignment cache at {}, starting empty", path.display());
            return cache;
        }

        let parsed: Result<CacheFile> = File::open(path)
            .map_err(anyhow::Error::from)
            .and_then(|f| Ok(serde_json::from_reader(BufReader::new(f))?));
        let file = match parsed {
            Ok(file) => file,
            Err(e) => {
                warn!("Ignoring unreadable alignment cache {}: {}", path.display(), e);
                return cache;
            }
        };
        if file.scoring != cache.signature {
            warn!(
                "Ignoring alignment cache {}: made with scoring {} but this run uses {}",
                path.display(),
                file.scoring,
                cache.signature
            );
            return cache;
        }

        let entries: HashMap<_, _> = file.entries.into_iter().map(|e| (e.key, e.profile)).collect();
        cache.loaded = entries.len();
        cache.entries = RwLock::new(entries);
        info!("Loaded {} cached alignments from {}", cache.loaded, path.display());
        cache
    }

    pub fn get(&self, query: &[u8], target: &[u8]) -> Option<AlignmentProfile> {
        let key = AlignmentKey::new(query, target);
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(&key).cloned()
    }

    /// Cached profile for the pair, computing and storing it with `align` on a miss.
    pub fn get_or_align<F>(&self, query: &[u8], target: &[u8], align: F) -> AlignmentProfile
    where
        F: FnOnce() -> AlignmentProfile,
    {
        let key = AlignmentKey::new(query, target);
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(profile) = entries.get(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return profile.clone();
            }
        }

        let profile = align();
        self.computed.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.entry(key).or_insert(profile).clone()
    }

    /// Write every entry, loaded and new, to `path`.
    ///
    /// The file is written next to its destination and renamed into place.
    pub fn persist<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut entries: Vec<CacheEntry> = {
            let map = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            map.iter()
                .map(|(key, profile)| CacheEntry {
                    key: key.clone(),
                    profile: profile.clone(),
                })
                .collect()
        };
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        let count = entries.len();
        let file = CacheFile {
            scoring: self.signature.clone(),
            entries,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_file_name(format!(
            "{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("alignments.json")
        ));
        {
            let mut writer = BufWriter::new(
                File::create(&tmp).with_context(|| format!("failed to create {}", tmp.display()))?,
            );
            serde_json::to_writer(&mut writer, &file)?;
            writer.flush()?;
        }
        fs::rename(&tmp, path)
            .with_context(|| format!("failed to move alignment cache into {}", path.display()))?;
        debug!("Persisted {} alignments to {}", count, path.display());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn loaded(&self) -> usize {
        self.loaded
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn computed(&self) -> u64 {
        self.computed.load(Ordering::Relaxed)
    }
}

/// Aligner workspace length for a run.
///
/// Long reads only ever have primer sized windows aligned, so the workspace is
/// sized from the primers rather than the reads.
pub fn workspace_capacity(max_read_len: usize, max_primer_len: usize, variable_stop: usize) -> usize {
    if max_read_len > LONG_READ_LEN {
        max_primer_len * 4 + variable_stop
    } else {
        max_read_len.max(max_primer_len)
    }
}

/// Per-worker aligner that consults the shared cache first.
pub struct PrimerAligner<'a> {
    aligner: Aligner<DegenerateMatch>,
    cache: &'a AlignmentCache,
}

impl<'a> PrimerAligner<'a> {
    pub fn new(cache: &'a AlignmentCache, scoring: &ScoringParams, max_primer_len: usize, capacity: usize) -> Self {
        let match_fn = DegenerateMatch {
            match_score: scoring.match_score,
            mismatch_score: scoring.mismatch_score,
        };
        Self {
            aligner: Aligner::with_capacity(
                max_primer_len,
                capacity,
                scoring.gap_open,
                scoring.gap_extend,
                match_fn,
            ),
            cache,
        }
    }

    /// Align `primer` against `window`, semi-globally in the primer.
    pub fn align(&mut self, primer: &[u8], window: &[u8]) -> AlignmentProfile {
        let Self { aligner, cache } = self;
        cache.get_or_align(primer, window, || {
            if window.is_empty() || primer.is_empty() {
                return AlignmentProfile::unaligned(primer.len());
            }
            let alignment = aligner.semiglobal(primer, window);
            AlignmentProfile::from_alignment(&alignment, primer, window)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn align(primer: &[u8], window: &[u8]) -> AlignmentProfile {
        let cache = AlignmentCache::new(&ScoringParams::default());
        let mut aligner = PrimerAligner::new(&cache, &ScoringParams::default(), 32, 64);
        aligner.align(primer, window)
    }

    #[test]
    fn test_degenerate_bases() {
        assert!(primer_base_matches(b'R', b'A'));
        assert!(primer_base_matches(b'R', b'G'));
        assert!(!primer_base_matches(b'R', b'C'));
        assert!(primer_base_matches(b'N', b'T'));
        assert!(!primer_base_matches(b'N', b'N'));
        assert!(!primer_base_matches(b'A', b'a'));
    }

    #[test]
    fn test_exact_primer_profile() {
        let profile = align(b"ACGTACGTTGCA", b"ACGTACGTTGCAGGGCCC");
        assert_eq!(profile.mismatches, 0);
        assert!(profile.gaps.is_empty());
        assert_eq!(profile.target_start, 0);
        assert_eq!(profile.target_end, 12);
        assert_eq!(profile.leading_gap + profile.trailing_gap, 0);
        assert!(AllowableErrors::default().passes(&profile, true));
    }

    #[test]
    fn test_mismatch_and_gap_profile() {
        let profile = align(b"ACGTACGTTGCA", b"ACGTACGATGCAGGG");
        assert_eq!(profile.mismatches, 1);
        assert!(profile.gaps.is_empty());

        // read lacks the G at primer position 6
        let profile = align(b"ACGTACGTTGCA", b"ACGTACTTGCAGGG");
        assert_eq!(profile.mismatches, 0);
        assert_eq!(profile.gaps, vec![1]);
        assert_eq!(profile.target_end, 11);
    }

    #[test]
    fn test_error_budget() {
        let mut profile = AlignmentProfile::unaligned(20);
        profile.leading_gap = 0;
        profile.target_end = 20;
        profile.mismatches = 2;
        profile.gaps = vec![1];
        let errors = AllowableErrors::default();
        assert!(errors.passes(&profile, true));
        assert_eq!(AllowableErrors::error_count(&profile, true), 3);

        profile.gaps = vec![1, 2];
        assert!(!errors.passes(&profile, true));

        profile.gaps = vec![];
        profile.trailing_gap = 3;
        assert!(!errors.passes(&profile, true));
        // 17 of 20 primer bases placed
        assert!(!errors.passes(&profile, false));
        profile.trailing_gap = 1;
        assert!(errors.passes(&profile, false));
    }

    #[test]
    fn test_cache_memoizes_by_content() {
        let cache = AlignmentCache::new(&ScoringParams::default());
        let mut calls = 0;
        let first = cache.get_or_align(b"ACGT", b"ACGTT", || {
            calls += 1;
            AlignmentProfile::unaligned(4)
        });
        let second = cache.get_or_align(b"ACGT", b"ACGTT", || {
            calls += 1;
            AlignmentProfile::unaligned(99)
        });
        assert_eq!(calls, 1);
        assert_eq!(first, second);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.computed(), 1);
    }

    #[test]
    fn test_cache_persist_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("alignments.json");
        let scoring = ScoringParams::default();

        let cache = AlignmentCache::new(&scoring);
        let mut aligner = PrimerAligner::new(&cache, &scoring, 16, 32);
        let profile = aligner.align(b"ACGTACGT", b"ACGTACGTAA");
        cache.persist(&path).unwrap();

        let reloaded = AlignmentCache::load(&path, &scoring);
        assert_eq!(reloaded.loaded(), 1);
        assert_eq!(reloaded.get(b"ACGTACGT", b"ACGTACGTAA"), Some(profile));
    }

    #[test]
    fn test_cache_with_other_scoring_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alignments.json");
        let cache = AlignmentCache::new(&ScoringParams::default());
        cache.get_or_align(b"AC", b"AC", || AlignmentProfile::unaligned(2));
        cache.persist(&path).unwrap();

        let other = ScoringParams { mismatch_score: -3, ..Default::default() };
        assert!(AlignmentCache::load(&path, &other).is_empty());
        assert!(AlignmentCache::load(dir.path().join("missing.json"), &other).is_empty());
    }

    #[test]
    fn test_workspace_capacity() {
        assert_eq!(workspace_capacity(300, 25, 10), 300);
        assert_eq!(workspace_capacity(5000, 25, 10), 110);
    }
}

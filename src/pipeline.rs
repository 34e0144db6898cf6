//! The extraction run
//!
//! A run has two phases:
//! - Demultiplex: every raw read is counted, prefiltered and assigned to a barcode
//!   bucket, buckets are staged to disk
//! - Filter: each bucket is read back and every read goes through primer
//!   identification and the filter chain, then is routed by its disposition
//!
//! Buckets are independent, with more than one thread they are filtered in
//! parallel, each with its own router, aligner and statistics. The alignment
//! cache is the only state they share.

use crate::alignment::{workspace_capacity, AlignmentCache, PrimerAligner};
use crate::barcodes::BarcodeMatcher;
use crate::config::{ExtractorParams, PARAMETERS_FILE};
use crate::contamination::ContaminationScreener;
use crate::filters::{AmbiguousBases, Disposition, MaxLength, MinLength, ReadCheck, StageResult};
use crate::ids::{IdTable, LengthCutoff, LengthCutoffTable};
use crate::io::{ReadSource, SeqFormat};
use crate::primers::PrimerMatcher;
use crate::quality::trim_leading_low_quality;
use crate::read::{Read, BAD_REVERSE_SUFFIX};
use crate::reporting::ExtractionReporter;
use crate::router::{streams, OutputRouter};
use crate::stats::{ExtractionStats, SampleKey};
use crate::UNRECOGNIZED;
use anyhow::Result;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// Bucket name when reads are not multiplexed.
pub const ALL_READS: &str = "all";

/// Reads staged for one barcode.
#[derive(Debug, Clone)]
pub struct Bucket {
    pub name: String,
    pub reads: u64,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ExtractionSummary {
    pub stats: ExtractionStats,
    /// (original name, new name) of renamed good reads.
    pub renames: Vec<(String, String)>,
    pub alignments_computed: u64,
    pub cache_hits: u64,
}

#[derive(Debug, Default)]
struct BucketOutcome {
    stats: ExtractionStats,
    renames: Vec<(String, String)>,
}

/// Why a read was not kept, and under which key it is counted.
#[derive(Debug)]
struct Rejection {
    key: SampleKey,
    disposition: Disposition,
}

pub struct Extractor {
    params: ExtractorParams,
    ids: IdTable,
    barcodes: Option<BarcodeMatcher>,
    primers: PrimerMatcher,
    screener: Option<ContaminationScreener>,
    cutoffs: LengthCutoffTable,
    cache: AlignmentCache,
    format: SeqFormat,
    sample_name: String,
}

impl Extractor {
    /// Read the id file and set up a run.
    pub fn new(params: ExtractorParams) -> Result<Self> {
        let ids = IdTable::from_file(&params.id_file)?;
        Self::with_ids(params, ids)
    }

    /// Set up a run. Every fatal configuration problem surfaces here, before
    /// any read is touched.
    pub fn with_ids(params: ExtractorParams, ids: IdTable) -> Result<Self> {
        params.validate(&ids)?;
        if params.multiplex {
            ids.check_mid_names()?;
        }
        let format = SeqFormat::from_path(&params.input)?;

        let cutoffs = if params.multiple_targets {
            LengthCutoffTable::load_optional(params.lengths.cutoffs_file.as_ref(), &ids)?
        } else {
            LengthCutoffTable::default()
        };
        let screener = params.contamination.build(&ids, params.multiple_targets)?;
        let cache = match &params.alignment_cache {
            Some(path) => AlignmentCache::load(path, &params.scoring),
            None => AlignmentCache::new(&params.scoring),
        };
        let barcodes = params
            .multiplex
            .then(|| BarcodeMatcher::new(ids.barcodes(), params.barcodes.clone()));
        let primers = PrimerMatcher::new(&ids, params.primers.clone());
        let sample_name = params.sample_name();

        Ok(Self {
            params,
            ids,
            barcodes,
            primers,
            screener,
            cutoffs,
            cache,
            format,
            sample_name,
        })
    }

    pub fn params(&self) -> &ExtractorParams {
        &self.params
    }

    pub fn run(&self) -> Result<ExtractionSummary> {
        let out_dir = &self.params.output.out_dir;
        fs::create_dir_all(out_dir)?;
        self.params.write_json(out_dir.join(PARAMETERS_FILE))?;

        let mut stats = ExtractionStats::new();
        let (buckets, max_read_len) = self.demultiplex(&mut stats)?;
        info!(
            "Demultiplexed {} reads into {} buckets",
            stats.total_reads,
            buckets.len()
        );

        let capacity = workspace_capacity(
            max_read_len,
            self.primers.max_primer_len(),
            self.params.barcodes.variable_stop,
        );
        let outcomes: Vec<BucketOutcome> = if self.params.threads > 1 && buckets.len() > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.params.threads)
                .build()?;
            pool.install(|| {
                buckets
                    .par_iter()
                    .map(|bucket| self.filter_bucket(bucket, capacity))
                    .collect::<Result<Vec<_>>>()
            })?
        } else {
            buckets
                .iter()
                .map(|bucket| self.filter_bucket(bucket, capacity))
                .collect::<Result<Vec<_>>>()?
        };

        let mut renames = Vec::new();
        for outcome in outcomes {
            stats.merge(&outcome.stats);
            renames.extend(outcome.renames);
        }
        if stats.accounted_reads() != stats.total_reads {
            warn!(
                "Accounted for {} of {} reads",
                stats.accounted_reads(),
                stats.total_reads
            );
        }

        let reporter = ExtractionReporter::new(
            self.params.lengths.min_len,
            self.params.lengths.max_len,
            self.params.lengths.small_fragment_cutoff,
            self.params.quality.label(),
        );
        reporter.write_all(&stats, &renames, out_dir)?;

        if let Some(dest) = self.params.cache_destination() {
            self.cache.persist(dest)?;
        }
        info!(
            "Alignments: {} computed, {} from cache",
            self.cache.computed(),
            self.cache.hits()
        );

        let staging = out_dir.join(streams::STAGING_DIR);
        if !self.params.output.debug && staging.exists() {
            fs::remove_dir_all(&staging)?;
        }

        Ok(ExtractionSummary {
            stats,
            renames,
            alignments_computed: self.cache.computed(),
            cache_hits: self.cache.hits(),
        })
    }

    /// Count, prefilter and stage every raw read by barcode.
    fn demultiplex(&self, stats: &mut ExtractionStats) -> Result<(Vec<Bucket>, usize)> {
        let mut router = OutputRouter::new(&self.params.output.out_dir, self.format);
        let mut counts: HashMap<String, u64> = HashMap::new();
        let mut max_read_len = 0;

        for read in ReadSource::open(&self.params.input)? {
            let mut read = read?;
            stats.record_total();
            max_read_len = max_read_len.max(read.len());

            if read.len() < self.params.lengths.small_fragment_cutoff {
                stats.record_small_fragment();
                router.write(&streams::small_fragments(), &read)?;
                continue;
            }
            if let Some(cutoff) = self.params.trim_at_quality {
                if read.qual.iter().all(|&q| q < cutoff) {
                    stats.record_bad_start_quality();
                    router.write(&streams::starts_with_bad_quality(), &read)?;
                    continue;
                }
                trim_leading_low_quality(&mut read, cutoff);
            }

            let bucket = match &self.barcodes {
                Some(matcher) => match matcher.determine(&mut read).name {
                    Some(name) => name,
                    None => {
                        stats.record_unmatched_barcode();
                        router.write(&streams::unrecognized_barcode(), &read)?;
                        continue;
                    }
                },
                None => ALL_READS.to_string(),
            };
            *counts.entry(bucket.clone()).or_insert(0) += 1;
            router.write(&streams::staged(&bucket), &read)?;
        }
        router.close_all()?;

        let names: Vec<String> = match &self.barcodes {
            Some(matcher) => matcher.barcodes().iter().map(|b| b.name.clone()).collect(),
            None => vec![ALL_READS.to_string()],
        };
        let buckets = names
            .into_iter()
            .filter_map(|name| {
                let reads = counts.get(&name).copied()?;
                let path = router.path_for(&streams::staged(&name));
                Some(Bucket { name, reads, path })
            })
            .collect();
        Ok((buckets, max_read_len))
    }

    fn filter_bucket(&self, bucket: &Bucket, capacity: usize) -> Result<BucketOutcome> {
        let mut outcome = BucketOutcome::default();
        let mut router = OutputRouter::new(&self.params.output.out_dir, self.format);

        let output = &self.params.output;
        if output.filter_small_read_counts && bucket.reads <= output.small_read_count {
            info!(
                "{} has only {} reads, setting it aside unfiltered",
                bucket.name, bucket.reads
            );
            for read in ReadSource::open(&bucket.path)? {
                router.write(&streams::small_read_count(&bucket.name), &read?)?;
            }
            outcome.stats.record_small_bucket(bucket.reads);
            router.close_all()?;
            return Ok(outcome);
        }

        let suffix = if self.params.multiplex {
            bucket.name.as_str()
        } else {
            self.sample_name.as_str()
        };
        let mut aligner = PrimerAligner::new(
            &self.cache,
            &self.params.scoring,
            self.primers.max_primer_len(),
            capacity,
        );
        let width = bucket.reads.to_string().len();
        let mut kept: HashMap<String, u64> = HashMap::new();

        for read in ReadSource::open(&bucket.path)? {
            let mut read = read?;
            let verdict = self.classify(&mut read, &bucket.name, suffix, &mut aligner);
            let strand = read.strand();
            match verdict {
                Ok(key) => {
                    outcome.stats.record_disposition(&key, Disposition::Good, strand);
                    let name = key.to_string();
                    if output.rename {
                        let index = kept.entry(name.clone()).or_insert(0);
                        *index += 1;
                        let renamed = format!("{}.{:0width$}", name, index, width = width);
                        outcome.renames.push((read.original_name(), renamed.clone()));
                        read.name = renamed;
                    }
                    router.write(&streams::good(&name), &read)?;
                }
                Err(Rejection { key, disposition }) => {
                    outcome.stats.record_disposition(&key, disposition, strand);
                    let stream = match disposition {
                        Disposition::UnrecognizedPrimer => streams::unrecognized_primer(&bucket.name),
                        Disposition::Contamination => streams::contamination(&key.to_string()),
                        Disposition::BadReverse => {
                            read.name.push_str(BAD_REVERSE_SUFFIX);
                            streams::bad(&key.to_string())
                        }
                        _ => streams::bad(&key.to_string()),
                    };
                    router.write(&stream, &read)?;
                }
            }
        }
        router.close_all()?;
        debug!("Filtered bucket {}", bucket.name);
        Ok(outcome)
    }

    /// Offset within which the leading primer may start.
    fn primer_offset(&self) -> usize {
        if !self.params.multiplex && self.params.barcodes.variable_start {
            self.params.barcodes.variable_stop
        } else {
            0
        }
    }

    fn length_cutoff(&self, target: &str) -> LengthCutoff {
        let global = LengthCutoff {
            min_len: self.params.lengths.min_len,
            max_len: self.params.lengths.max_len,
        };
        if self.params.multiple_targets {
            self.cutoffs.get(target).copied().unwrap_or(global)
        } else {
            global
        }
    }

    /// Identify the read's target and run it through the filter chain.
    fn classify(
        &self,
        read: &mut Read,
        bucket: &str,
        suffix: &str,
        aligner: &mut PrimerAligner,
    ) -> Result<SampleKey, Rejection> {
        let unrecognized = || Rejection {
            key: SampleKey::new(UNRECOGNIZED, bucket),
            disposition: Disposition::UnrecognizedPrimer,
        };
        let within = self.primer_offset();

        // Reads flipped by the barcode matcher are already in canonical
        // orientation, `found_in_reverse` only tracks the primer strand.
        let (target, found_in_reverse) = if self.params.no_forward_primer {
            let target = self.ids.targets().first().ok_or_else(unrecognized)?;
            (target.target.clone(), false)
        } else {
            match self.primers.determine_forward(read, within, aligner).name {
                Some(target) => (target, false),
                None if self.params.primers.check_complement => {
                    let found = self.primers.determine_with_reverse(read, within, aligner);
                    (found.name.ok_or_else(unrecognized)?, true)
                }
                None => return Err(unrecognized()),
            }
        };

        let key = SampleKey::new(target.as_str(), suffix);
        match self.run_checks(read, &target, found_in_reverse, aligner) {
            Ok(()) => Ok(key),
            Err(disposition) => Err(Rejection { key, disposition }),
        }
    }

    /// The filter chain, in order. The first failing check decides.
    fn run_checks(
        &self,
        read: &mut Read,
        target: &str,
        found_in_reverse: bool,
        aligner: &mut PrimerAligner,
    ) -> StageResult {
        if let Some(screener) = &self.screener {
            screener.check(read, target, found_in_reverse)?;
        }
        let cutoff = self.length_cutoff(target);
        MinLength(cutoff.min_len).check(read)?;

        if !self.params.no_reverse_primer {
            let within = self.params.barcodes.variable_stop;
            self.primers
                .resolve_reverse(read, target, found_in_reverse, within, aligner)?;
            MinLength(cutoff.min_len).check(read)?;
        }
        if found_in_reverse {
            read.reverse_complement();
        }

        AmbiguousBases {
            max_ns: self.params.max_ns,
        }
        .check(read)?;
        MaxLength(cutoff.max_len).check(read)?;
        self.params.quality.check(read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::io::read_all;
    use crate::reporting::{PROFILE_FILE, SUMMARY_FILE};
    use bio::alphabets::dna::revcomp;
    use std::path::Path;

    const MID1: &str = "ACGTAC";
    const MID2: &str = "TGCATG";
    const FWD: &str = "CCTAGGTTACGG";
    const REV: &str = "GTTCAGAGCTTA";
    const AMPLICON: &str = "ATGGCATTCGACCTAGTAGCTTGACAGGTCATCGGATACA";
    const OTHER_AMPLICON: &str = "GGCTTAACCGTAGCATCGATGCAAGTCCGATGACTTAGCC";

    fn rc(s: &str) -> String {
        String::from_utf8(revcomp(s.as_bytes())).unwrap()
    }

    fn write_fastq(path: &Path, reads: &[(&str, String)]) {
        let mut content = String::new();
        for (name, seq) in reads {
            content.push_str(&format!("@{}\n{}\n+\n{}\n", name, seq, "I".repeat(seq.len())));
        }
        fs::write(path, content).unwrap();
    }

    fn ids() -> IdTable {
        let mut ids = IdTable::new();
        ids.add_target("T1", FWD, REV).unwrap();
        ids.add_barcode("MID1", MID1).unwrap();
        ids.add_barcode("MID2", MID2).unwrap();
        ids
    }

    fn multiplexed_run(dir: &Path) -> ExtractorParams {
        let input = dir.join("reads.fastq");
        write_fastq(
            &input,
            &[
                ("r1", format!("{MID1}{FWD}{AMPLICON}{}", rc(REV))),
                ("r2", format!("{MID1}{FWD}ACGTT{}", rc(REV))),
                ("r3", format!("{MID2}GAGAGAGAGAGA{AMPLICON}")),
                ("r4", format!("CCCCCCCCCC{AMPLICON}")),
                ("r5", "ACGTAC".to_string()),
                ("r6", rc(&format!("{MID1}{FWD}{AMPLICON}{}", rc(REV)))),
            ],
        );
        let mut params = ExtractorParams::new(input, dir.join("ids.txt"), dir.join("out"));
        params.multiplex = true;
        params.barcodes.check_complement = true;
        params.lengths.min_len = 30;
        params.lengths.max_len = 100;
        params.lengths.small_fragment_cutoff = 20;
        params
    }

    #[test]
    fn test_multiplexed_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let params = multiplexed_run(dir.path());
        let out = params.output.out_dir.clone();
        let summary = Extractor::with_ids(params, ids()).unwrap().run().unwrap();
        let stats = &summary.stats;

        assert_eq!(stats.total_reads, 6);
        assert_eq!(stats.small_fragments, 1);
        assert_eq!(stats.unmatched_barcode, 1);
        assert_eq!(stats.failed_forward["MID2"].forward, 1);
        let counts = &stats.per_key["T1MID1"];
        assert_eq!(counts.good_forward, 1);
        assert_eq!(counts.good_reverse, 1);
        assert_eq!(counts.min_len_bad, 1);
        assert_eq!(stats.accounted_reads(), stats.total_reads);

        let good = read_all(out.join("T1MID1.fastq")).unwrap();
        assert_eq!(good.len(), 2);
        assert!(good.iter().all(|r| r.seq == AMPLICON.as_bytes()));
        assert_eq!(good[1].name, "r6_Comp");

        assert_eq!(read_all(out.join("filteredOff/bad/T1MID1.fastq")).unwrap()[0].name, "r2");
        assert!(out.join("filteredOff/unrecognizedPrimer/MID2.fastq").exists());
        assert!(out.join("filteredOff/bad/unrecognizedBarcode.fastq").exists());
        assert!(out.join("filteredOff/bad/smallFragments.fastq").exists());
        assert!(!out.join(streams::STAGING_DIR).exists());
        assert!(out.join(PROFILE_FILE).exists());
        assert!(out.join(SUMMARY_FILE).exists());
        assert!(out.join(PARAMETERS_FILE).exists());
    }

    #[test]
    fn test_threads_and_rename() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = multiplexed_run(dir.path());
        params.threads = 2;
        params.output.rename = true;
        params.output.debug = true;
        let out = params.output.out_dir.clone();
        let summary = Extractor::with_ids(params, ids()).unwrap().run().unwrap();

        assert_eq!(summary.stats.per_key["T1MID1"].good(), 2);
        assert_eq!(
            summary.renames,
            vec![
                ("r1".to_string(), "T1MID1.1".to_string()),
                ("r6".to_string(), "T1MID1.2".to_string()),
            ]
        );
        let good = read_all(out.join("T1MID1.fastq")).unwrap();
        assert_eq!(good[0].name, "T1MID1.1");
        assert!(out.join("unfilteredReads/byBarcodes/MID1.fastq").exists());
    }

    #[test]
    fn test_small_buckets_are_set_aside() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = multiplexed_run(dir.path());
        params.output.filter_small_read_counts = true;
        params.output.small_read_count = 2;
        let out = params.output.out_dir.clone();
        let summary = Extractor::with_ids(params, ids()).unwrap().run().unwrap();

        // MID2 has a single read
        assert_eq!(summary.stats.small_bucket_reads, 1);
        assert!(summary.stats.failed_forward.is_empty());
        assert!(out.join("smallReadCounts/MID2.fastq").exists());
        assert_eq!(summary.stats.accounted_reads(), 6);
    }

    #[test]
    fn test_small_read_count_is_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = multiplexed_run(dir.path());
        params.output.filter_small_read_counts = true;
        params.output.small_read_count = 3;
        let out = params.output.out_dir.clone();
        let summary = Extractor::with_ids(params, ids()).unwrap().run().unwrap();

        // MID1 has exactly three reads
        assert_eq!(summary.stats.small_bucket_reads, 4);
        assert!(summary.stats.per_key.is_empty());
        assert_eq!(read_all(out.join("smallReadCounts/MID1.fastq")).unwrap().len(), 3);
        assert_eq!(summary.stats.accounted_reads(), 6);
    }

    #[test]
    fn test_barcode_complement_reads_match_forward_primer() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("reads.fastq");
        let molecule = format!("{MID1}{FWD}{AMPLICON}{}", rc(REV));
        write_fastq(&input, &[("plus", molecule.clone()), ("minus", rc(&molecule))]);
        let mut params = ExtractorParams::new(input, dir.path().join("ids.txt"), dir.path().join("out"));
        params.multiplex = true;
        params.barcodes.check_complement = true;
        params.lengths.min_len = 30;
        params.lengths.small_fragment_cutoff = 20;
        let out = params.output.out_dir.clone();
        let summary = Extractor::with_ids(params, ids()).unwrap().run().unwrap();

        assert!(summary.stats.failed_forward.is_empty());
        let counts = &summary.stats.per_key["T1MID1"];
        assert_eq!(counts.good_forward, 1);
        assert_eq!(counts.good_reverse, 1);
        let good = read_all(out.join("T1MID1.fastq")).unwrap();
        assert_eq!(good.len(), 2);
        assert!(good.iter().all(|r| r.seq == AMPLICON.as_bytes()));
        assert_eq!(good[1].name, "minus_Comp");
    }

    #[test]
    fn test_no_forward_primer_keeps_barcode_orientation() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("reads.fastq");
        let molecule = format!("{MID1}{AMPLICON}{}", rc(REV));
        write_fastq(&input, &[("plus", molecule.clone()), ("minus", rc(&molecule))]);
        let mut params = ExtractorParams::new(input, dir.path().join("ids.txt"), dir.path().join("out"));
        params.multiplex = true;
        params.no_forward_primer = true;
        params.barcodes.check_complement = true;
        params.lengths.min_len = 30;
        params.lengths.small_fragment_cutoff = 20;
        let out = params.output.out_dir.clone();
        let summary = Extractor::with_ids(params, ids()).unwrap().run().unwrap();

        let counts = &summary.stats.per_key["T1MID1"];
        assert_eq!(counts.good_forward, 1);
        assert_eq!(counts.good_reverse, 1);
        assert_eq!(counts.bad_reverse, 0);
        let good = read_all(out.join("T1MID1.fastq")).unwrap();
        assert!(good.iter().all(|r| r.seq == AMPLICON.as_bytes()));
    }

    #[test]
    fn test_short_insert_is_min_len_bad() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("reads.fastq");
        write_fastq(
            &input,
            &[
                ("long", "ACGTACGATTACACCGGTTAACCGGTTAACCGGTTAACCGGTT".to_string()),
                ("short", "ACGTACGATTACACCGGTTAACC".to_string()),
            ],
        );
        let mut params = ExtractorParams::new(input, dir.path().join("ids.txt"), dir.path().join("out"));
        params.multiplex = true;
        params.no_reverse_primer = true;
        params.lengths.min_len = 20;
        params.lengths.small_fragment_cutoff = 10;
        let out = params.output.out_dir.clone();

        let mut ids = IdTable::new();
        ids.add_target("T1", "GATTACA", "TTTTTTTT").unwrap();
        ids.add_barcode("MID1", "ACGTAC").unwrap();
        let summary = Extractor::with_ids(params, ids).unwrap().run().unwrap();

        let counts = &summary.stats.per_key["T1MID1"];
        assert_eq!(counts.good_forward, 1);
        assert_eq!(counts.min_len_bad, 1);
        let good = read_all(out.join("T1MID1.fastq")).unwrap();
        assert_eq!(good[0].seq, b"CCGGTTAACCGGTTAACCGGTTAACCGGTT");
        assert_eq!(read_all(out.join("filteredOff/bad/T1MID1.fastq")).unwrap()[0].name, "short");
    }

    #[test]
    fn test_primer_complement_is_reoriented() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("reads.fastq");
        write_fastq(&input, &[("flipped", format!("{REV}{}{}", rc(AMPLICON), rc(FWD)))]);
        let mut params = ExtractorParams::new(input, dir.path().join("ids.txt"), dir.path().join("out"));
        params.primers.check_complement = true;
        params.output.sample_name = Some("run1".to_string());
        params.lengths.min_len = 30;
        params.lengths.small_fragment_cutoff = 20;
        let out = params.output.out_dir.clone();

        let mut ids = IdTable::new();
        ids.add_target("T1", FWD, REV).unwrap();
        let summary = Extractor::with_ids(params, ids).unwrap().run().unwrap();

        assert_eq!(summary.stats.per_key["T1run1"].good_forward, 1);
        let good = read_all(out.join("T1run1.fastq")).unwrap();
        assert_eq!(good[0].seq, AMPLICON.as_bytes());
        assert_eq!(good[0].name, "flipped");
    }

    #[test]
    fn test_contamination_without_barcodes() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("reads.fastq");
        write_fastq(
            &input,
            &[
                ("good", format!("{FWD}{AMPLICON}{}", rc(REV))),
                ("contam", format!("{FWD}{OTHER_AMPLICON}{}", rc(REV))),
                ("short", format!("{FWD}ACGTTACGTTACGT{}", rc(REV))),
            ],
        );
        let mut params = ExtractorParams::new(input, dir.path().join("ids.txt"), dir.path().join("out"));
        params.output.sample_name = Some("run1".to_string());
        params.lengths.min_len = 30;
        params.lengths.max_len = 100;
        params.lengths.small_fragment_cutoff = 20;
        params.contamination.compare_seq = Some(OTHER_AMPLICON.to_string());
        let out = params.output.out_dir.clone();

        let mut ids = IdTable::new();
        ids.add_target("T1", FWD, REV).unwrap();
        let summary = Extractor::with_ids(params, ids).unwrap().run().unwrap();

        let counts = &summary.stats.per_key["T1run1"];
        assert_eq!(counts.good(), 1);
        assert_eq!(counts.contamination, 1);
        assert_eq!(counts.bad(), 1);
        assert_eq!(read_all(out.join("filteredOff/contamination/T1run1.fastq")).unwrap()[0].name, "contam");
        assert_eq!(read_all(out.join("T1run1.fastq")).unwrap()[0].seq, AMPLICON.as_bytes());
    }

    #[test]
    fn test_bad_reverse_is_renamed() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("reads.fastq");
        write_fastq(&input, &[("r1", format!("{FWD}{AMPLICON}GAGAGAGAGAGA"))]);
        let mut params = ExtractorParams::new(input, dir.path().join("ids.txt"), dir.path().join("out"));
        params.lengths.min_len = 30;
        let out = params.output.out_dir.clone();

        let mut ids = IdTable::new();
        ids.add_target("T1", FWD, REV).unwrap();
        let summary = Extractor::with_ids(params, ids).unwrap().run().unwrap();

        let key = format!("T1{}", "reads");
        assert_eq!(summary.stats.per_key[&key].bad_reverse, 1);
        let bad = read_all(out.join(format!("filteredOff/bad/{key}.fastq"))).unwrap();
        assert_eq!(bad[0].name, "r1_badReverse");
    }

    #[test]
    fn test_alignment_cache_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("alignments.json");
        let mut params = multiplexed_run(dir.path());
        params.alignment_cache = Some(cache.clone());
        let first = Extractor::with_ids(params.clone(), ids()).unwrap().run().unwrap();
        assert!(first.alignments_computed > 0);
        assert!(cache.exists());

        params.output.out_dir = dir.path().join("second");
        let second = Extractor::with_ids(params, ids()).unwrap().run().unwrap();
        assert_eq!(second.alignments_computed, 0);
        assert!(second.cache_hits > 0);
        assert_eq!(second.stats, first.stats);
    }

    #[test]
    fn test_no_forward_primer_with_two_targets_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = ExtractorParams::new(dir.path().join("reads.fastq"), dir.path().join("ids.txt"), dir.path().join("out"));
        params.no_forward_primer = true;
        let mut ids = IdTable::new();
        ids.add_target("T1", FWD, REV).unwrap();
        ids.add_target("T2", "GGGGAAAACCCC", "TTTTGGGGAAAA").unwrap();

        let err = Extractor::with_ids(params, ids).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::AmbiguousNoForwardPrimer { count: 2, .. })
        ));
    }
}

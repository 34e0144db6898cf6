//! Ampliseq Extractor
//!
//! Demultiplex reads by barcode, identify their target by primer and filter them
//! into good and bad outputs with extraction statistics.

use ampliseq_extract::alignment::AllowableErrors;
use ampliseq_extract::config::ExtractorParams;
use ampliseq_extract::contamination::ScreenMode;
use ampliseq_extract::error::ConfigError;
use ampliseq_extract::pipeline::Extractor;
use ampliseq_extract::quality::QualityFilter;
use anyhow::{anyhow, bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use env_logger::Env;
use log::{error, info};
use std::path::PathBuf;

fn cli() -> Command {
    Command::new("ampliseq-extractor")
        .version("0.1.0")
        .about("Extract amplicon reads by barcode and primer")
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_name("FASTQ")
                .help("Input reads, fastq or fasta (gzip supported)")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("id")
                .long("id")
                .value_name("FILE")
                .help("Id file with the primer table and optional barcode table")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("out_dir")
                .short('o')
                .long("out-dir")
                .value_name("DIRECTORY")
                .help("Output directory")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("params")
                .long("params")
                .value_name("JSON")
                .help("Start from the parameters in this file (e.g. a previous parametersUsed.json)")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(flag("multiplex", "multiplex", "Reads carry barcodes (MIDs)"))
        .arg(flag("multiple_targets", "multiple-targets", "Several targets are amplified per sample"))
        .arg(count_arg("barcode_errors", "barcode-errors", "Allowed barcode mismatches (default 0)"))
        .arg(count_arg("variable_start", "variable-start", "Barcode (or primer, when not multiplexed) may start within this many bases"))
        .arg(flag("check_complement", "check-complement", "Also look for barcodes on the complementary strand"))
        .arg(flag("barcodes_both_ends", "barcodes-both-ends", "Require the barcode at both ends of the read"))
        .arg(flag("no_forward_primer", "no-forward-primer", "Reads have no forward primer, only valid with a single target"))
        .arg(flag("no_reverse_primer", "no-reverse-primer", "Don't look for the reverse primer"))
        .arg(flag("primer_complement", "primer-complement", "Look for the reverse primer at the start when the forward primer is missing"))
        .arg(count_arg("primer_mismatches", "primer-mismatches", "Allowed primer mismatches (default 2)"))
        .arg(count_arg("primer_one_base_indels", "primer-one-base-indels", "Allowed single base primer indels (default 1)"))
        .arg(count_arg("primer_two_base_indels", "primer-two-base-indels", "Allowed two base primer indels (default 0)"))
        .arg(count_arg("primer_large_indels", "primer-large-indels", "Allowed larger primer indels (default 0)"))
        .arg(count_arg("reverse_mismatches", "reverse-mismatches", "Allowed reverse primer mismatches (default: same as forward)"))
        .arg(flag("count_end_gaps", "count-end-gaps", "Count primer bases hanging off the read as indels"))
        .arg(flag("primer_case_sensitive", "primer-case-sensitive", "Treat lower case read bases as mismatches"))
        .arg(count_arg("min_len", "min-len", "Minimum extracted length (default 200)"))
        .arg(count_arg("max_len", "max-len", "Maximum extracted length (default 400)"))
        .arg(count_arg("small_fragment_cutoff", "small-fragment-cutoff", "Drop raw reads shorter than this (default 50)"))
        .arg(
            Arg::new("length_cutoffs")
                .long("length-cutoffs")
                .value_name("FILE")
                .help("Per target length cut offs (columns target, minlen, maxlen)")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(count_arg("max_ns", "max-ns", "Maximum number of N bases (default 0)"))
        .arg(
            Arg::new("trim_at_qual")
                .long("trim-at-qual")
                .value_name("SCORE")
                .help("Trim leading bases below this quality before demultiplexing")
                .value_parser(value_parser!(u8)),
        )
        .arg(
            Arg::new("quality_window")
                .long("quality-window")
                .value_name("LEN,STEP,THRESHOLD")
                .help("Sliding window quality check (default 50,5,25)"),
        )
        .arg(flag("quality_window_trim", "quality-window-trim", "Trim at the first failing window instead of failing the read"))
        .arg(
            Arg::new("qual_check")
                .long("qual-check")
                .value_name("SCORE")
                .help("Use the fraction of bases at or above this quality instead of windows")
                .value_parser(value_parser!(u8)),
        )
        .arg(
            Arg::new("qual_check_cutoff")
                .long("qual-check-cutoff")
                .value_name("FRACTION")
                .help("Minimum fraction of bases passing --qual-check")
                .default_value("0.75")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("contamination_seq")
                .long("contamination-seq")
                .value_name("SEQ")
                .help("Screen reads against this sequence"),
        )
        .arg(
            Arg::new("contamination_file")
                .long("contamination-file")
                .value_name("FASTA")
                .help("Screen reads against these sequences, one per target with --multiple-targets")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(count_arg("contamination_kmer_len", "contamination-kmer-len", "K-mer length for screening (default 5)"))
        .arg(
            Arg::new("contamination_cutoff")
                .long("contamination-cutoff")
                .value_name("FRACTION")
                .help("Minimum k-mer similarity (default 0.8)")
                .value_parser(value_parser!(f64)),
        )
        .arg(flag("multiple_compare", "multiple-compare", "Compare against every record of --contamination-file"))
        .arg(flag("reference_mode", "reference-mode", "Screening sequences are the expected targets, flag reads unlike them"))
        .arg(flag("rename", "rename", "Rename good reads to <sample key>.<index>"))
        .arg(
            Arg::new("sample_name")
                .long("sample-name")
                .value_name("NAME")
                .help("Sample name for non multiplexed runs (default: input file stem)"),
        )
        .arg(flag("debug", "debug", "Keep the staged per barcode reads"))
        .arg(flag("verbose", "verbose", "Log at debug level"))
        .arg(count_arg("filter_small_read_counts", "filter-small-read-counts", "Set aside barcodes with at most this many reads"))
        .arg(
            Arg::new("aln_cache")
                .long("aln-cache")
                .value_name("JSON")
                .help("Alignment cache to load and update")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("aln_cache_out")
                .long("aln-cache-out")
                .value_name("JSON")
                .help("Write the alignment cache here instead of back to --aln-cache")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("threads")
                .short('t')
                .long("threads")
                .value_name("N")
                .help("Barcodes filtered in parallel (default 1)")
                .value_parser(value_parser!(usize)),
        )
}

fn flag(id: &'static str, long: &'static str, help: &'static str) -> Arg {
    Arg::new(id)
        .long(long)
        .help(help)
        .action(ArgAction::SetTrue)
}

fn count_arg(id: &'static str, long: &'static str, help: &'static str) -> Arg {
    Arg::new(id)
        .long(long)
        .value_name("N")
        .help(help)
        .value_parser(value_parser!(usize))
}

fn parse_window(value: &str) -> Result<(usize, usize, u8)> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        bail!("quality window should be LEN,STEP,THRESHOLD, got {value}");
    }
    Ok((parts[0].parse()?, parts[1].parse()?, parts[2].parse()?))
}

/// Build the run parameters, command line options override a --params file.
fn build_params(matches: &ArgMatches) -> Result<ExtractorParams> {
    let mut params = match matches.get_one::<PathBuf>("params") {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse parameters in {}", path.display()))?
        }
        None => ExtractorParams::default(),
    };

    if let Some(input) = matches.get_one::<PathBuf>("input") {
        params.input = input.clone();
    }
    if let Some(id) = matches.get_one::<PathBuf>("id") {
        params.id_file = id.clone();
    }
    if let Some(out_dir) = matches.get_one::<PathBuf>("out_dir") {
        params.output.out_dir = out_dir.clone();
    }
    if params.input.as_os_str().is_empty() || params.id_file.as_os_str().is_empty() {
        return Err(anyhow!("--input and --id are required (directly or through --params)"));
    }

    let usize_arg = |id: &str| matches.get_one::<usize>(id).copied();

    params.multiplex |= matches.get_flag("multiplex");
    params.multiple_targets |= matches.get_flag("multiple_targets");
    if let Some(n) = usize_arg("barcode_errors") {
        params.barcodes.max_errors = n as u32;
    }
    if let Some(n) = usize_arg("variable_start") {
        params.barcodes.variable_start = true;
        params.barcodes.variable_stop = n;
    }
    params.barcodes.check_complement |= matches.get_flag("check_complement");
    params.barcodes.both_ends |= matches.get_flag("barcodes_both_ends");

    params.no_forward_primer |= matches.get_flag("no_forward_primer");
    params.no_reverse_primer |= matches.get_flag("no_reverse_primer");
    params.primers.check_complement |= matches.get_flag("primer_complement");
    params.primers.count_end_gaps |= matches.get_flag("count_end_gaps");
    if matches.get_flag("primer_case_sensitive") {
        params.primers.forward_case_insensitive = false;
        params.primers.reverse_case_insensitive = false;
    }
    let forward_before = params.primers.forward_errors;
    let forward: &mut AllowableErrors = &mut params.primers.forward_errors;
    if let Some(n) = usize_arg("primer_mismatches") {
        forward.mismatches = n as u32;
    }
    if let Some(n) = usize_arg("primer_one_base_indels") {
        forward.one_base_indels = n as u32;
    }
    if let Some(n) = usize_arg("primer_two_base_indels") {
        forward.two_base_indels = n as u32;
    }
    if let Some(n) = usize_arg("primer_large_indels") {
        forward.large_base_indels = n as u32;
    }
    if params.primers.forward_errors != forward_before {
        params.primers.reverse_errors = params.primers.forward_errors;
    }
    if let Some(n) = usize_arg("reverse_mismatches") {
        params.primers.reverse_errors.mismatches = n as u32;
    }

    if let Some(n) = usize_arg("min_len") {
        params.lengths.min_len = n;
    }
    if let Some(n) = usize_arg("max_len") {
        params.lengths.max_len = n;
    }
    if let Some(n) = usize_arg("small_fragment_cutoff") {
        params.lengths.small_fragment_cutoff = n;
    }
    if let Some(path) = matches.get_one::<PathBuf>("length_cutoffs") {
        params.lengths.cutoffs_file = Some(path.clone());
    }
    if let Some(n) = usize_arg("max_ns") {
        params.max_ns = n;
    }
    if let Some(q) = matches.get_one::<u8>("trim_at_qual") {
        params.trim_at_quality = Some(*q);
    }

    if let Some(quality) = matches.get_one::<u8>("qual_check") {
        let cutoff = matches.get_one::<f64>("qual_check_cutoff").copied().unwrap_or(0.75);
        params.quality = QualityFilter::Fraction {
            quality: *quality,
            cutoff,
        };
    } else if let Some(window) = matches.get_one::<String>("quality_window") {
        let (length, step, threshold) = parse_window(window)?;
        params.quality = QualityFilter::Window { length, step, threshold };
    }
    if matches.get_flag("quality_window_trim") {
        if let QualityFilter::Window { length, step, threshold } = params.quality {
            params.quality = QualityFilter::WindowTrim {
                length,
                step,
                threshold,
                min_len: params.lengths.min_len,
            };
        }
    }

    if let Some(seq) = matches.get_one::<String>("contamination_seq") {
        params.contamination.compare_seq = Some(seq.to_ascii_uppercase());
    }
    if let Some(path) = matches.get_one::<PathBuf>("contamination_file") {
        params.contamination.compare_file = Some(path.clone());
    }
    if let Some(k) = usize_arg("contamination_kmer_len") {
        params.contamination.kmer_len = k;
    }
    if let Some(cutoff) = matches.get_one::<f64>("contamination_cutoff") {
        params.contamination.cutoff = *cutoff;
    }
    params.contamination.multiple_compare |= matches.get_flag("multiple_compare");
    if matches.get_flag("reference_mode") {
        params.contamination.mode = ScreenMode::Reference;
    }

    params.output.rename |= matches.get_flag("rename");
    params.output.debug |= matches.get_flag("debug");
    if let Some(name) = matches.get_one::<String>("sample_name") {
        params.output.sample_name = Some(name.clone());
    }
    if let Some(n) = usize_arg("filter_small_read_counts") {
        params.output.filter_small_read_counts = true;
        params.output.small_read_count = n as u64;
    }
    if let Some(path) = matches.get_one::<PathBuf>("aln_cache") {
        params.alignment_cache = Some(path.clone());
    }
    if let Some(path) = matches.get_one::<PathBuf>("aln_cache_out") {
        params.alignment_cache_out = Some(path.clone());
    }
    if let Some(n) = usize_arg("threads") {
        params.threads = n.max(1);
    }
    Ok(params)
}

fn run(matches: &ArgMatches) -> Result<()> {
    let params = build_params(matches)?;

    info!("Input: {}", params.input.display());
    info!("Id file: {}", params.id_file.display());
    info!("Output: {}", params.output.out_dir.display());

    let extractor = Extractor::new(params)?;
    let summary = extractor.run()?;
    let stats = &summary.stats;

    println!("📊 Extraction Results:");
    println!("  Total reads: {}", stats.total_reads);
    println!("  Unmatched barcode: {}", stats.unmatched_barcode);
    println!(
        "  Small fragments: {}, bad start quality: {}, small barcodes: {}",
        stats.small_fragments, stats.bad_start_quality, stats.small_bucket_reads
    );
    println!("  Failed forward primer: {}", stats.failed_forward_total());
    println!("  Failed filtering: {}", stats.failed_filtering());
    println!("  Contamination: {}", stats.contamination());
    println!("  Used: {}", stats.good());
    println!(
        "  Alignments: {} computed, {} cached",
        summary.alignments_computed, summary.cache_hits
    );
    println!("💾 Results saved to: {}", extractor.params().output.out_dir.display());
    Ok(())
}

fn main() {
    let matches = cli().get_matches();
    let level = if matches.get_flag("verbose") { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();
    if let Err(e) = run(&matches) {
        error!("{:#}", e);
        let code = if e.downcast_ref::<ConfigError>().is_some() { 2 } else { 1 };
        std::process::exit(code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let matches = cli().get_matches_from([
            "ampliseq-extractor",
            "--input",
            "reads.fastq",
            "--id",
            "ids.txt",
            "--multiplex",
            "--barcode-errors",
            "1",
            "--variable-start",
            "4",
            "--min-len",
            "150",
            "--qual-check",
            "30",
            "--reference-mode",
        ]);
        let params = build_params(&matches).unwrap();
        assert!(params.multiplex);
        assert_eq!(params.barcodes.max_errors, 1);
        assert!(params.barcodes.variable_start);
        assert_eq!(params.barcodes.variable_stop, 4);
        assert_eq!(params.lengths.min_len, 150);
        assert_eq!(params.quality, QualityFilter::Fraction { quality: 30, cutoff: 0.75 });
        assert_eq!(params.contamination.mode, ScreenMode::Reference);
    }

    #[test]
    fn test_input_is_required() {
        let matches = cli().get_matches_from(["ampliseq-extractor", "--id", "ids.txt"]);
        assert!(build_params(&matches).is_err());
        assert!(parse_window("50,5").is_err());
        assert_eq!(parse_window("50, 5, 25").unwrap(), (50, 5, 25));
    }
}

//! Primer determination
//!
//! Identifies the target of a read from the primer at its start and resolves the
//! opposite primer at its end:
//! - Forward: the forward primer is aligned against the start of the read
//! - Complement: reads from the other strand start with the reverse primer, they
//!   are resolved against the forward primer's reverse complement at the tail
//! - Reverse: the tail window is searched for the reverse complement of the
//!   opposite primer and the read is cut at the primer
//!
//! Matches are judged by alignment profile against an error budget. The
//! fewest errors wins and ties go to the target declared first.

use crate::alignment::{AllowableErrors, PrimerAligner};
use crate::filters::{Disposition, StageResult};
use crate::ids::IdTable;
use crate::read::Read;
use crate::MatchResult;
use bio::alphabets::dna::revcomp;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimerSearch {
    pub forward_errors: AllowableErrors,
    pub reverse_errors: AllowableErrors,
    /// Upper case read bases before aligning the forward primer.
    pub forward_case_insensitive: bool,
    /// Upper case read bases before aligning the reverse primer.
    pub reverse_case_insensitive: bool,
    /// Count primer bases hanging off the window as indels.
    pub count_end_gaps: bool,
    /// Try the reverse primer at the read start when the forward primer is not found.
    pub check_complement: bool,
}

impl Default for PrimerSearch {
    fn default() -> Self {
        Self {
            forward_errors: AllowableErrors::default(),
            reverse_errors: AllowableErrors::default(),
            forward_case_insensitive: true,
            reverse_case_insensitive: true,
            count_end_gaps: false,
            check_complement: false,
        }
    }
}

#[derive(Debug, Clone)]
struct TargetPrimers {
    target: String,
    forward: Vec<u8>,
    reverse: Vec<u8>,
    forward_rc: Vec<u8>,
    reverse_rc: Vec<u8>,
}

/// Which primer is expected at the start of the read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadingPrimer {
    Forward,
    Reverse,
}

pub struct PrimerMatcher {
    targets: Vec<TargetPrimers>,
    search: PrimerSearch,
}

impl PrimerMatcher {
    pub fn new(ids: &IdTable, search: PrimerSearch) -> Self {
        let targets = ids
            .targets()
            .iter()
            .map(|pair| {
                let forward = pair.forward.to_ascii_uppercase().into_bytes();
                let reverse = pair.reverse.to_ascii_uppercase().into_bytes();
                TargetPrimers {
                    target: pair.target.clone(),
                    forward_rc: revcomp(&forward[..]),
                    reverse_rc: revcomp(&reverse[..]),
                    forward,
                    reverse,
                }
            })
            .collect();
        Self { targets, search }
    }

    pub fn max_primer_len(&self) -> usize {
        self.targets
            .iter()
            .map(|t| t.forward.len().max(t.reverse.len()))
            .max()
            .unwrap_or(0)
    }

    /// Find the forward primer within `within` bases of the read start and trim
    /// through it.
    pub fn determine_forward(&self, read: &mut Read, within: usize, aligner: &mut PrimerAligner) -> MatchResult {
        self.determine_leading(read, within, LeadingPrimer::Forward, aligner)
    }

    /// Find the reverse primer at the read start, for reads from the other strand.
    pub fn determine_with_reverse(&self, read: &mut Read, within: usize, aligner: &mut PrimerAligner) -> MatchResult {
        self.determine_leading(read, within, LeadingPrimer::Reverse, aligner)
    }

    fn determine_leading(
        &self,
        read: &mut Read,
        within: usize,
        leading: LeadingPrimer,
        aligner: &mut PrimerAligner,
    ) -> MatchResult {
        let (errors, case_insensitive) = match leading {
            LeadingPrimer::Forward => (&self.search.forward_errors, self.search.forward_case_insensitive),
            LeadingPrimer::Reverse => (&self.search.reverse_errors, self.search.reverse_case_insensitive),
        };
        let seq = prepare(&read.seq, case_insensitive);

        // (target index, profile, errors)
        let mut best = None;
        for (index, target) in self.targets.iter().enumerate() {
            let primer = match leading {
                LeadingPrimer::Forward => &target.forward,
                LeadingPrimer::Reverse => &target.reverse,
            };
            let end = (within + primer.len() + errors.indel_slack()).min(seq.len());
            let profile = aligner.align(primer, &seq[..end]);
            if !errors.passes(&profile, self.search.count_end_gaps) {
                continue;
            }
            let count = AllowableErrors::error_count(&profile, self.search.count_end_gaps);
            if best.as_ref().map_or(true, |(_, _, c)| count < *c) {
                best = Some((index, profile, count));
            }
        }

        match best {
            Some((index, profile, count)) => {
                read.trim_front(profile.target_end);
                MatchResult::found(
                    self.targets[index].target.clone(),
                    profile.target_start..profile.target_end,
                    count,
                )
            }
            None => MatchResult::unrecognized(),
        }
    }

    /// Cut the read at the opposite primer.
    ///
    /// The tail of the read is searched for the reverse complement of the reverse
    /// primer, or of the forward primer when the read came from the other
    /// strand. On success the read keeps everything before the primer.
    pub fn resolve_reverse(
        &self,
        read: &mut Read,
        target: &str,
        found_in_reverse: bool,
        within: usize,
        aligner: &mut PrimerAligner,
    ) -> StageResult {
        let Some(primers) = self.targets.iter().find(|t| t.target == target) else {
            return Err(Disposition::BadReverse);
        };
        let primer = if found_in_reverse {
            &primers.forward_rc
        } else {
            &primers.reverse_rc
        };

        let seq = prepare(&read.seq, self.search.reverse_case_insensitive);
        let window_len = (primer.len() * 2 + within).min(seq.len());
        let window_start = seq.len() - window_len;
        let profile = aligner.align(primer, &seq[window_start..]);
        if !self.search.reverse_errors.passes(&profile, self.search.count_end_gaps) {
            return Err(Disposition::BadReverse);
        }
        read.truncate(window_start + profile.target_start);
        Ok(())
    }
}

fn prepare(seq: &[u8], case_insensitive: bool) -> Cow<'_, [u8]> {
    if case_insensitive && seq.iter().any(|b| b.is_ascii_lowercase()) {
        Cow::Owned(seq.to_ascii_uppercase())
    } else {
        Cow::Borrowed(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::{AlignmentCache, ScoringParams};

    const FWD: &str = "ACGTACGTTGCA";
    const REV: &str = "CATGCATGGATC";
    const AMPLICON: &str = "GGGAAATTTCCCGGGAAATTT";

    fn ids() -> IdTable {
        let mut ids = IdTable::new();
        ids.add_target("T1", FWD, REV).unwrap();
        ids.add_target("T2", "TTTTCCCCGGGG", "AAAACCCCAAAA").unwrap();
        ids
    }

    fn rc(s: &str) -> String {
        String::from_utf8(revcomp(s.as_bytes())).unwrap()
    }

    fn read(seq: &str) -> Read {
        Read::with_uniform_quality("r1", seq.as_bytes().to_vec(), 40)
    }

    #[test]
    fn test_forward_primer_identifies_target() {
        let cache = AlignmentCache::new(&ScoringParams::default());
        let mut aligner = PrimerAligner::new(&cache, &ScoringParams::default(), 12, 64);
        let matcher = PrimerMatcher::new(&ids(), PrimerSearch::default());

        let mut r = read(&format!("{}{}{}", FWD, AMPLICON, rc(REV)));
        let result = matcher.determine_forward(&mut r, 0, &mut aligner);
        assert_eq!(result.label(), "T1");
        assert_eq!(result.range, 0..12);
        assert_eq!(result.edits, 0);
        assert!(r.seq.starts_with(AMPLICON.as_bytes()));

        matcher.resolve_reverse(&mut r, "T1", false, 0, &mut aligner).unwrap();
        assert_eq!(r.seq, AMPLICON.as_bytes());
    }

    #[test]
    fn test_lower_case_read_depends_on_case_flag() {
        let cache = AlignmentCache::new(&ScoringParams::default());
        let mut aligner = PrimerAligner::new(&cache, &ScoringParams::default(), 12, 64);
        let seq = format!("{}{}", FWD.to_ascii_lowercase(), AMPLICON);

        let insensitive = PrimerMatcher::new(&ids(), PrimerSearch::default());
        assert!(insensitive.determine_forward(&mut read(&seq), 0, &mut aligner).is_match());

        let search = PrimerSearch { forward_case_insensitive: false, ..Default::default() };
        let sensitive = PrimerMatcher::new(&ids(), search);
        assert!(!sensitive.determine_forward(&mut read(&seq), 0, &mut aligner).is_match());
    }

    #[test]
    fn test_unknown_primer_is_unrecognized() {
        let cache = AlignmentCache::new(&ScoringParams::default());
        let mut aligner = PrimerAligner::new(&cache, &ScoringParams::default(), 12, 64);
        let matcher = PrimerMatcher::new(&ids(), PrimerSearch::default());
        let mut r = read(&format!("GAGAGAGAGAGA{}", AMPLICON));
        let before = r.clone();
        assert!(!matcher.determine_forward(&mut r, 0, &mut aligner).is_match());
        assert_eq!(r, before);
    }

    #[test]
    fn test_missing_reverse_primer() {
        let cache = AlignmentCache::new(&ScoringParams::default());
        let mut aligner = PrimerAligner::new(&cache, &ScoringParams::default(), 12, 64);
        let matcher = PrimerMatcher::new(&ids(), PrimerSearch::default());
        let mut r = read(&format!("{}GAGAGAGAGAGAGA", AMPLICON));
        assert_eq!(
            matcher.resolve_reverse(&mut r, "T1", false, 0, &mut aligner),
            Err(Disposition::BadReverse)
        );
    }

    #[test]
    fn test_complement_read_resolves_forward_at_tail() {
        let cache = AlignmentCache::new(&ScoringParams::default());
        let mut aligner = PrimerAligner::new(&cache, &ScoringParams::default(), 12, 64);
        let matcher = PrimerMatcher::new(&ids(), PrimerSearch::default());

        let mut r = read(&format!("{}{}{}", REV, rc(AMPLICON), rc(FWD)));
        let result = matcher.determine_with_reverse(&mut r, 0, &mut aligner);
        assert_eq!(result.label(), "T1");
        matcher.resolve_reverse(&mut r, "T1", true, 0, &mut aligner).unwrap();
        r.reverse_complement();
        assert_eq!(r.seq, AMPLICON.as_bytes());
    }

    #[test]
    fn test_repeated_windows_hit_the_cache() {
        let cache = AlignmentCache::new(&ScoringParams::default());
        let mut aligner = PrimerAligner::new(&cache, &ScoringParams::default(), 12, 64);
        let matcher = PrimerMatcher::new(&ids(), PrimerSearch::default());
        for _ in 0..3 {
            let mut r = read(&format!("{}{}", FWD, AMPLICON));
            matcher.determine_forward(&mut r, 0, &mut aligner);
        }
        // one alignment per target, computed once
        assert_eq!(cache.computed(), 2);
        assert_eq!(cache.hits(), 4);
    }
}

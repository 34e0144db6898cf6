//! Read dispositions and the checks that assign them
//!
//! Every read ends in exactly one [`Disposition`]. The checks run in a fixed
//! order and the first failing one decides; a check reports its failure as
//! `Err(Disposition)` so that a chain of checks short-circuits with `?`.

use crate::read::Read;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Disposition {
    Good,
    MinLenBad,
    MaxLenBad,
    BadReverse,
    ContainsNs,
    QualityFailed,
    Contamination,
    UnrecognizedBarcode,
    UnrecognizedPrimer,
}

impl Disposition {
    pub fn is_good(&self) -> bool {
        matches!(self, Disposition::Good)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Disposition::Good => "GOOD",
            Disposition::MinLenBad => "MINLENBAD",
            Disposition::MaxLenBad => "MAXLENBAD",
            Disposition::BadReverse => "BADREVERSE",
            Disposition::ContainsNs => "CONTAINSNS",
            Disposition::QualityFailed => "QUALITYFAILED",
            Disposition::Contamination => "CONTAMINATION",
            Disposition::UnrecognizedBarcode => "UNRECBARCODE",
            Disposition::UnrecognizedPrimer => "UNRECPRIMER",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of one step of the filter chain.
pub type StageResult<T = ()> = Result<T, Disposition>;

/// A single check in the filter chain. Checks may trim the read.
pub trait ReadCheck {
    fn check(&self, read: &mut Read) -> StageResult;
}

/// Reads shorter than the cutoff fail.
#[derive(Debug, Clone, Copy)]
pub struct MinLength(pub usize);

impl ReadCheck for MinLength {
    fn check(&self, read: &mut Read) -> StageResult {
        if read.len() < self.0 {
            return Err(Disposition::MinLenBad);
        }
        Ok(())
    }
}

/// Reads longer than the cutoff fail.
#[derive(Debug, Clone, Copy)]
pub struct MaxLength(pub usize);

impl ReadCheck for MaxLength {
    fn check(&self, read: &mut Read) -> StageResult {
        if read.len() > self.0 {
            return Err(Disposition::MaxLenBad);
        }
        Ok(())
    }
}

/// Reads with more than the allowed number of `N` bases fail.
#[derive(Debug, Clone, Copy)]
pub struct AmbiguousBases {
    pub max_ns: usize,
}

impl ReadCheck for AmbiguousBases {
    fn check(&self, read: &mut Read) -> StageResult {
        if read.count_base(b'N') > self.max_ns {
            return Err(Disposition::ContainsNs);
        }
        Ok(())
    }
}

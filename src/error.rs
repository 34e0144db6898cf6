//! Fatal configuration errors
//!
//! Anything in here aborts a run before the first read is classified. Per-read
//! outcomes are never errors, see [`crate::filters::Disposition`].

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no forward primer was requested but {count} targets are configured ({targets}); only one target may be supplied")]
    AmbiguousNoForwardPrimer { count: usize, targets: String },

    #[error("contamination screening per target is on but there is no profile for {target}; options are: {available}")]
    MissingContaminationProfile { target: String, available: String },

    #[error("length cut off table {path} needs the columns target, minlen and maxlen, only have: {found}")]
    MissingCutoffColumns { path: PathBuf, found: String },

    #[error("length cut off table {path}, line {line}: {reason}")]
    MalformedCutoffRow {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("id file {path} should start with either target or gene (case insensitive), found: {line}")]
    MissingPrimerHeader { path: PathBuf, line: String },

    #[error("id file {path}, line {line}: {reason}")]
    MalformedIdLine {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("duplicate target name {0}")]
    DuplicateTarget(String),

    #[error("duplicate barcode name {0}")]
    DuplicateBarcode(String),

    #[error("target names can't contain '_', rename the following targets: {0}")]
    ReservedSeparator(String),

    #[error("barcode names need to be letters followed by a number, failed: {0}")]
    InvalidBarcodeName(String),

    #[error("multiplexing was requested but the id file has no barcodes")]
    NoBarcodes,

    #[error("no targets were found in the id file")]
    NoTargets,
}

//! Primer, barcode and length cut off tables
//!
//! The id file has two whitespace delimited sections:
//! - a header starting with `target` (or `gene`) followed by `name forward reverse` rows
//! - an optional header starting with `id` followed by `name motif` rows

use crate::error::ConfigError;
use anyhow::{Context, Result};
use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Separator used to join several target names into one composite key, so it
/// can't appear inside a target name.
pub const TARGET_SEPARATOR: char = '_';

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Barcode {
    pub name: String,
    pub motif: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimerPair {
    pub target: String,
    pub forward: String,
    pub reverse: String,
}

/// Targets and barcodes of a run, kept in declaration order since that order
/// breaks ties between equally good matches.
#[derive(Debug, Clone, Default)]
pub struct IdTable {
    targets: Vec<PrimerPair>,
    barcodes: Vec<Barcode>,
}

impl IdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and validate an id file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read id file {}", path.display()))?;
        Ok(Self::parse(path, &content)?)
    }

    pub fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        let mut table = IdTable::new();
        let mut lines = content
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty());

        let first = lines.next().map(|(_, l)| l.trim().to_string()).unwrap_or_default();
        if !is_primer_header(&first) {
            return Err(ConfigError::MissingPrimerHeader {
                path: path.to_path_buf(),
                line: first,
            });
        }

        let mut reading_primers = true;
        for (idx, line) in lines {
            let lower = line.trim().to_ascii_lowercase();
            if is_primer_header(&lower) {
                reading_primers = true;
                continue;
            }
            if lower.starts_with("id") {
                reading_primers = false;
                continue;
            }
            let toks: Vec<&str> = line.split_whitespace().collect();
            if reading_primers {
                if toks.len() != 3 {
                    return Err(malformed(path, idx, format!("primer line should contain 3 items not {}", toks.len())));
                }
                table.add_target(toks[0], toks[1], toks[2])?;
            } else {
                if toks.len() != 2 {
                    return Err(malformed(path, idx, format!("barcode line should contain 2 items not {}", toks.len())));
                }
                table.add_barcode(toks[0], toks[1])?;
            }
        }

        if table.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        table.check_target_names()?;
        Ok(table)
    }

    pub fn add_target(&mut self, name: &str, forward: &str, reverse: &str) -> Result<(), ConfigError> {
        if self.has_target(name) {
            return Err(ConfigError::DuplicateTarget(name.to_string()));
        }
        self.targets.push(PrimerPair {
            target: name.to_string(),
            forward: forward.to_ascii_uppercase(),
            reverse: reverse.to_ascii_uppercase(),
        });
        Ok(())
    }

    pub fn add_barcode(&mut self, name: &str, motif: &str) -> Result<(), ConfigError> {
        if self.has_barcode(name) {
            return Err(ConfigError::DuplicateBarcode(name.to_string()));
        }
        self.barcodes.push(Barcode {
            name: name.to_string(),
            motif: motif.to_ascii_uppercase(),
        });
        Ok(())
    }

    pub fn targets(&self) -> &[PrimerPair] {
        &self.targets
    }

    pub fn barcodes(&self) -> &[Barcode] {
        &self.barcodes
    }

    pub fn target(&self, name: &str) -> Option<&PrimerPair> {
        self.targets.iter().find(|t| t.target == name)
    }

    pub fn has_target(&self, name: &str) -> bool {
        self.target(name).is_some()
    }

    pub fn has_barcode(&self, name: &str) -> bool {
        self.barcodes.iter().any(|b| b.name == name)
    }

    pub fn target_names(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.target.clone()).collect()
    }

    pub fn contains_barcodes(&self) -> bool {
        !self.barcodes.is_empty()
    }

    pub fn has_multiple_targets(&self) -> bool {
        self.targets.len() > 1
    }

    pub fn max_primer_len(&self) -> usize {
        self.targets
            .iter()
            .map(|t| t.forward.len().max(t.reverse.len()))
            .max()
            .unwrap_or(0)
    }

    fn check_target_names(&self) -> Result<(), ConfigError> {
        let failed: Vec<&str> = self
            .targets
            .iter()
            .filter(|t| t.target.contains(TARGET_SEPARATOR))
            .map(|t| t.target.as_str())
            .collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ReservedSeparator(failed.join(", ")))
        }
    }

    /// Barcode names end up in file and sample names, they need to be letters
    /// followed by digits (e.g. `MID12`).
    pub fn check_mid_names(&self) -> Result<(), ConfigError> {
        let pattern = Regex::new(r"^[A-Za-z]+[0-9]+$").expect("valid barcode name pattern");
        let failed: Vec<&str> = self
            .barcodes
            .iter()
            .filter(|b| !pattern.is_match(&b.name))
            .map(|b| b.name.as_str())
            .collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::InvalidBarcodeName(failed.join(", ")))
        }
    }

    /// Write the table back out, optionally restricted to `only` these targets.
    /// Rows are sorted by name.
    pub fn write_id_file<P: AsRef<Path>>(&self, path: P, only: Option<&[String]>) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_path(path.as_ref())
            .with_context(|| format!("failed to create {}", path.as_ref().display()))?;

        writer.write_record(["target", "forward", "reverse"])?;
        let mut targets: Vec<&PrimerPair> = self
            .targets
            .iter()
            .filter(|t| only.map_or(true, |names| names.contains(&t.target)))
            .collect();
        targets.sort_by(|a, b| a.target.cmp(&b.target));
        for t in targets {
            writer.write_record([&t.target, &t.forward, &t.reverse])?;
        }

        if self.contains_barcodes() {
            writer.write_record(["id", "barcode"])?;
            let mut barcodes: Vec<&Barcode> = self.barcodes.iter().collect();
            barcodes.sort_by(|a, b| a.name.cmp(&b.name));
            for b in barcodes {
                writer.write_record([&b.name, &b.motif])?;
            }
        }
        writer.flush()?;
        Ok(())
    }
}

fn is_primer_header(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.starts_with("target") || lower.starts_with("gene")
}

fn malformed(path: &Path, idx: usize, reason: String) -> ConfigError {
    ConfigError::MalformedIdLine {
        path: path.to_path_buf(),
        line: idx + 1,
        reason,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LengthCutoff {
    pub min_len: usize,
    pub max_len: usize,
}

/// Per target length cut offs, reconciled against the targets of an [`IdTable`].
#[derive(Debug, Clone, Default)]
pub struct LengthCutoffTable {
    cutoffs: HashMap<String, LengthCutoff>,
    /// Rows naming a target that isn't in the id table.
    pub not_matching: Vec<String>,
    /// Targets with no row in the table.
    pub missing: Vec<String>,
}

impl LengthCutoffTable {
    /// Read a cut off table, a missing `target`, `minlen` or `maxlen` column is fatal.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<HashMap<String, LengthCutoff>> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read length cut off table {}", path.display()))?;
        Ok(Self::parse(path, &content)?)
    }

    pub fn parse(path: &Path, content: &str) -> Result<HashMap<String, LengthCutoff>, ConfigError> {
        let mut lines = content
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty());
        let header: Vec<String> = lines
            .next()
            .map(|(_, l)| l.split_whitespace().map(|c| c.to_ascii_lowercase()).collect())
            .unwrap_or_default();
        let col = |name: &str| header.iter().position(|c| c == name);
        let (target_col, min_col, max_col) = match (col("target"), col("minlen"), col("maxlen")) {
            (Some(t), Some(mi), Some(ma)) => (t, mi, ma),
            _ => {
                return Err(ConfigError::MissingCutoffColumns {
                    path: path.to_path_buf(),
                    found: header.join(","),
                })
            }
        };

        let mut cutoffs = HashMap::new();
        for (idx, line) in lines {
            let toks: Vec<&str> = line.split_whitespace().collect();
            let bad_row = |reason: String| ConfigError::MalformedCutoffRow {
                path: path.to_path_buf(),
                line: idx + 1,
                reason,
            };
            if toks.len() != header.len() {
                return Err(bad_row(format!("expected {} columns, found {}", header.len(), toks.len())));
            }
            let parse_len = |s: &str| {
                s.parse::<usize>()
                    .map_err(|_| bad_row(format!("{s} is not a length")))
            };
            cutoffs.insert(
                toks[target_col].to_string(),
                LengthCutoff {
                    min_len: parse_len(toks[min_col])?,
                    max_len: parse_len(toks[max_col])?,
                },
            );
        }
        Ok(cutoffs)
    }

    /// Keep the cut offs that belong to known targets and note the rest.
    pub fn reconcile(cutoffs: HashMap<String, LengthCutoff>, ids: &IdTable) -> Self {
        let mut not_matching: Vec<String> = cutoffs
            .keys()
            .filter(|t| !ids.has_target(t))
            .cloned()
            .collect();
        not_matching.sort();
        let missing: Vec<String> = ids
            .targets()
            .iter()
            .filter(|t| !cutoffs.contains_key(&t.target))
            .map(|t| t.target.clone())
            .collect();
        let cutoffs = cutoffs
            .into_iter()
            .filter(|(t, _)| ids.has_target(t))
            .collect();
        Self {
            cutoffs,
            not_matching,
            missing,
        }
    }

    /// Read and reconcile an optional table. An unreadable file only warns, a
    /// table without the required columns is still fatal.
    pub fn load_optional(path: Option<&PathBuf>, ids: &IdTable) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            warn!("length cut off table {} doesn't exist, using the global cut offs", path.display());
            return Ok(Self::default());
        }
        let table = Self::reconcile(Self::read(path)?, ids);
        for warning in table.warnings() {
            warn!("{warning}");
        }
        Ok(table)
    }

    pub fn get(&self, target: &str) -> Option<&LengthCutoff> {
        self.cutoffs.get(target)
    }

    pub fn len(&self) -> usize {
        self.cutoffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cutoffs.is_empty()
    }

    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !self.not_matching.is_empty() {
            warnings.push(format!(
                "length cut offs not matching any target: {}",
                self.not_matching.join(", ")
            ));
        }
        if !self.missing.is_empty() {
            warnings.push(format!(
                "targets missing a length cut off: {}",
                self.missing.join(", ")
            ));
        }
        warnings
    }
}

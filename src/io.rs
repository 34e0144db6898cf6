//! Sequence record input and output
//!
//! The extractor only needs two things from the record layer: iterate the reads
//! of a file and append reads to a file. Both FASTQ and FASTA are supported,
//! input may be gzip compressed.

use crate::read::{Read, DEFAULT_FASTA_QUALITY};
use anyhow::{anyhow, Context, Result};
use bio::io::{fasta, fastq};
use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

/// Phred+33 encoding offset.
pub const PHRED_OFFSET: u8 = 33;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeqFormat {
    Fastq,
    Fasta,
}

impl SeqFormat {
    /// Guess the format from the file extension, ignoring a trailing `.gz`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let name = path
            .as_ref()
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        let name = name.strip_suffix(".gz").unwrap_or(&name);
        let ext = name.rsplit('.').next().unwrap_or("");
        match ext {
            "fastq" | "fq" => Ok(SeqFormat::Fastq),
            "fasta" | "fa" | "fna" | "fas" => Ok(SeqFormat::Fasta),
            _ => Err(anyhow!(
                "can't determine the sequence format of {}, expected a fastq or fasta extension",
                path.as_ref().display()
            )),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            SeqFormat::Fastq => "fastq",
            SeqFormat::Fasta => "fasta",
        }
    }
}

fn open_input(path: &Path) -> Result<Box<dyn io::Read>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let is_gz = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    if is_gz {
        Ok(Box::new(MultiGzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// Streaming reader over the reads of one file.
pub enum ReadSource {
    Fastq(fastq::Records<BufReader<Box<dyn io::Read>>>),
    Fasta(fasta::Records<BufReader<Box<dyn io::Read>>>),
}

impl ReadSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let format = SeqFormat::from_path(path)?;
        let input = open_input(path)?;
        Ok(match format {
            SeqFormat::Fastq => ReadSource::Fastq(fastq::Reader::new(input).records()),
            SeqFormat::Fasta => ReadSource::Fasta(fasta::Reader::new(input).records()),
        })
    }
}

impl Iterator for ReadSource {
    type Item = Result<Read>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            ReadSource::Fastq(records) => records.next().map(|rec| {
                let rec = rec?;
                let qual: Vec<u8> = rec.qual().iter().map(|q| q.saturating_sub(PHRED_OFFSET)).collect();
                if qual.len() != rec.seq().len() {
                    return Err(anyhow!(
                        "read {} has {} bases but {} quality scores",
                        rec.id(),
                        rec.seq().len(),
                        qual.len()
                    ));
                }
                Ok(Read::new(rec.id(), rec.seq().to_vec(), qual))
            }),
            ReadSource::Fasta(records) => records.next().map(|rec| {
                let rec = rec?;
                Ok(Read::with_uniform_quality(
                    rec.id(),
                    rec.seq().to_vec(),
                    DEFAULT_FASTA_QUALITY,
                ))
            }),
        }
    }
}

/// Read every record of a (small) file into memory.
pub fn read_all<P: AsRef<Path>>(path: P) -> Result<Vec<Read>> {
    ReadSource::open(path)?.collect()
}

/// Append-only writer for one output stream.
pub enum SeqSink {
    Fastq(fastq::Writer<File>),
    Fasta(fasta::Writer<File>),
}

impl SeqSink {
    pub fn create<P: AsRef<Path>>(path: P, format: SeqFormat) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        Ok(match format {
            SeqFormat::Fastq => SeqSink::Fastq(fastq::Writer::new(file)),
            SeqFormat::Fasta => SeqSink::Fasta(fasta::Writer::new(file)),
        })
    }

    pub fn write_read(&mut self, read: &Read) -> Result<()> {
        match self {
            SeqSink::Fastq(writer) => {
                let qual: Vec<u8> = read
                    .qual
                    .iter()
                    .map(|q| q.saturating_add(PHRED_OFFSET).min(b'~'))
                    .collect();
                writer.write(&read.name, None, &read.seq, &qual)?;
            }
            SeqSink::Fasta(writer) => writer.write(&read.name, None, &read.seq)?,
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        match self {
            SeqSink::Fastq(writer) => writer.flush()?,
            SeqSink::Fasta(writer) => writer.flush()?,
        }
        Ok(())
    }
}

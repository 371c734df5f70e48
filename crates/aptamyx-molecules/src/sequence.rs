//! Candidate sequences and the quantities derived directly from them.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use aptamyx_common::{AptamyxError, Result};

/// DNA alphabet candidates are drawn from.
pub const DNA_ALPHABET: [char; 4] = ['A', 'T', 'C', 'G'];

// Average nucleotide masses (Da) for single-stranded DNA.
const WEIGHT_A: f64 = 331.2218;
const WEIGHT_C: f64 = 307.1971;
const WEIGHT_G: f64 = 347.2212;
const WEIGHT_T: f64 = 322.2085;
const WATER: f64 = 18.0153;

/// An immutable DNA sequence over {A,T,C,G}. Join key across all stages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sequence(String);

impl Sequence {
    /// Parse and validate a DNA sequence. Lower-case input is accepted and
    /// normalised to upper case.
    pub fn parse(raw: &str) -> Result<Self> {
        let normalised = raw.trim().to_ascii_uppercase();
        if normalised.is_empty() {
            return Err(AptamyxError::Input("sequence is empty".into()));
        }
        if let Some((pos, bad)) = normalised
            .chars()
            .enumerate()
            .find(|(_, c)| !DNA_ALPHABET.contains(c))
        {
            return Err(AptamyxError::Input(format!(
                "symbol '{bad}' at position {pos} is outside the DNA alphabet"
            )));
        }
        Ok(Sequence(normalised))
    }

    /// Build from symbols already known to be in the alphabet.
    pub(crate) fn from_symbols(symbols: String) -> Self {
        debug_assert!(symbols.chars().all(|c| DNA_ALPHABET.contains(&c)));
        Sequence(symbols)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fraction of G/C symbols, 0.0 for an empty sequence.
    pub fn gc_content(&self) -> f64 {
        gc_fraction(&self.0)
    }

    /// Average molecular weight of the linear single strand.
    pub fn molecular_weight(&self) -> f64 {
        if self.0.is_empty() {
            return 0.0;
        }
        let residues: f64 = self
            .0
            .chars()
            .map(|c| match c {
                'A' => WEIGHT_A,
                'C' => WEIGHT_C,
                'G' => WEIGHT_G,
                _ => WEIGHT_T,
            })
            .sum();
        residues - (self.0.len() - 1) as f64 * WATER
    }

    /// RNA rendering: every `T` becomes `U`.
    pub fn to_rna(&self) -> RnaSequence {
        RnaSequence(self.0.replace('T', "U"))
    }

    /// Short content hash used as a cache key for per-sequence scratch space.
    pub fn content_key(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        format!("{:x}", digest)[..8].to_string()
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Sequence {
    type Error = AptamyxError;

    fn try_from(value: String) -> Result<Self> {
        Sequence::parse(&value)
    }
}

impl From<Sequence> for String {
    fn from(value: Sequence) -> Self {
        value.0
    }
}

/// RNA rendering of a [`Sequence`]. Contains no `T` by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RnaSequence(String);

impl RnaSequence {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn bases(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for RnaSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub(crate) fn gc_fraction(symbols: &str) -> f64 {
    if symbols.is_empty() {
        return 0.0;
    }
    let gc = symbols
        .chars()
        .filter(|c| matches!(c.to_ascii_uppercase(), 'G' | 'C'))
        .count();
    gc as f64 / symbols.len() as f64
}

//! Secondary-structure folding.
//!
//! Two engines sit behind [`FoldingEngine`]:
//! - [`NearestNeighbourFolder`]: built-in Zuker-style minimum free energy DP
//!   with Turner stacking energies and simplified loop penalties.
//! - [`RnaFoldCli`]: the ViennaRNA `RNAfold` executable, run under the
//!   same timeout as every other external tool.
//!
//! Engines only ever see an [`RnaSequence`], so the T→U mapping is done
//! exactly once, upstream of every engine.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use aptamyx_common::{AptamyxError, Result, ToolFailure};

use crate::sequence::RnaSequence;
use crate::tool::ExternalTool;

/// Dot-bracket structure plus its free energy (kcal/mol).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondaryStructure {
    pub dot_bracket: String,
    pub mfe: f64,
}

impl SecondaryStructure {
    /// Number of bracket characters (twice the number of base pairs).
    pub fn paired_positions(&self) -> usize {
        paired_positions(&self.dot_bracket)
    }
}

pub(crate) fn paired_positions(dot_bracket: &str) -> usize {
    dot_bracket.chars().filter(|c| matches!(c, '(' | ')')).count()
}

#[async_trait]
pub trait FoldingEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Fold an RNA sequence. Must be deterministic for a given input.
    async fn fold(&self, rna: &RnaSequence) -> Result<SecondaryStructure>;
}

// ── Energy model ──────────────────────────────────────────────────────────────

// All energies in dcal/mol.
const INF: i32 = i32::MAX / 4;
const MIN_HAIRPIN: usize = 3;
const ML_CLOSING: i32 = 340;
const ML_BRANCH: i32 = 40;
const ML_UNPAIRED: i32 = 0;
const TERMINAL_AU: i32 = 50;
const LOOP_EXTRAPOLATION: f64 = 107.856;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pair {
    AU,
    UA,
    CG,
    GC,
    GU,
    UG,
}

impl Pair {
    fn of(a: u8, b: u8) -> Option<Pair> {
        match (a, b) {
            (b'A', b'U') => Some(Pair::AU),
            (b'U', b'A') => Some(Pair::UA),
            (b'C', b'G') => Some(Pair::CG),
            (b'G', b'C') => Some(Pair::GC),
            (b'G', b'U') => Some(Pair::GU),
            (b'U', b'G') => Some(Pair::UG),
            _ => None,
        }
    }

    fn flip(self) -> Pair {
        match self {
            Pair::AU => Pair::UA,
            Pair::UA => Pair::AU,
            Pair::CG => Pair::GC,
            Pair::GC => Pair::CG,
            Pair::GU => Pair::UG,
            Pair::UG => Pair::GU,
        }
    }

    fn is_gc(self) -> bool {
        matches!(self, Pair::CG | Pair::GC)
    }

    fn is_wobble(self) -> bool {
        matches!(self, Pair::GU | Pair::UG)
    }

    fn terminal_penalty(self) -> i32 {
        if self.is_gc() {
            0
        } else {
            TERMINAL_AU
        }
    }
}

/// Stacking of `outer` (i, j) on `inner` (i+1, j-1).
fn stack_energy(outer: Pair, inner: Pair) -> i32 {
    use Pair::*;
    if outer.is_wobble() || inner.is_wobble() {
        return if outer.is_gc() || inner.is_gc() { -140 } else { -50 };
    }
    match (outer, inner) {
        (AU, AU) => -93,
        (AU, UA) => -110,
        (UA, AU) => -133,
        (CG, UA) => -208,
        (CG, AU) => -211,
        (GC, UA) => -224,
        (GC, AU) => -235,
        (CG, GC) => -236,
        (GC, GC) => -326,
        (GC, CG) => -342,
        // the remaining Watson-Crick stacks are 180° rotations of the above
        _ => stack_energy(inner.flip(), outer.flip()),
    }
}

fn extrapolate(base: i32, size: usize, reference: usize) -> i32 {
    base + (LOOP_EXTRAPOLATION * (size as f64 / reference as f64).ln()).round() as i32
}

fn hairpin_initiation(size: usize) -> i32 {
    match size {
        3 => 540,
        4 => 560,
        5 => 570,
        6 => 540,
        7 => 600,
        8 => 610,
        9 => 620,
        n => extrapolate(620, n, 9),
    }
}

fn bulge_initiation(size: usize) -> i32 {
    match size {
        1 => 380,
        2 => 280,
        3 => 320,
        4 => 360,
        5 => 400,
        6 => 440,
        n => extrapolate(440, n, 6),
    }
}

fn interior_initiation(size: usize) -> i32 {
    match size {
        2 => 50,
        3 => 160,
        4 => 110,
        5 => 200,
        6 => 200,
        n => extrapolate(200, n, 6),
    }
}

// ── Built-in folder ──────────────────────────────────────────────────────────

/// Minimum free energy folding with a nearest-neighbour energy model.
#[derive(Debug, Clone)]
pub struct NearestNeighbourFolder {
    max_interior_loop: usize,
}

impl NearestNeighbourFolder {
    pub fn new(max_interior_loop: usize) -> Self {
        Self { max_interior_loop }
    }

    /// Run the DP on the calling thread.
    pub fn fold_blocking(&self, rna: &RnaSequence) -> Result<SecondaryStructure> {
        if rna.is_empty() {
            return Err(AptamyxError::Input("cannot fold an empty sequence".into()));
        }
        let tables = DpTables::fill(rna.bases(), self.max_interior_loop);
        let dot_bracket = tables.traceback()?;
        Ok(SecondaryStructure {
            dot_bracket,
            mfe: tables.exterior[tables.n] as f64 / 100.0,
        })
    }
}

impl Default for NearestNeighbourFolder {
    fn default() -> Self {
        Self::new(30)
    }
}

#[async_trait]
impl FoldingEngine for NearestNeighbourFolder {
    fn name(&self) -> &str {
        "nearest-neighbour"
    }

    /// The DP is CPU-bound, so it runs on the blocking pool.
    async fn fold(&self, rna: &RnaSequence) -> Result<SecondaryStructure> {
        let folder = self.clone();
        let rna = rna.clone();
        tokio::task::spawn_blocking(move || folder.fold_blocking(&rna))
            .await
            .map_err(|e| AptamyxError::Other(anyhow::anyhow!("folding task failed: {e}")))?
    }
}

struct DpTables<'a> {
    seq: &'a [u8],
    n: usize,
    max_loop: usize,
    /// V[i][j]: best energy with i and j paired
    v: Vec<Vec<i32>>,
    /// WM[i][j]: best energy of i..=j as part of a multiloop
    wm: Vec<Vec<i32>>,
    /// exterior[k]: best energy of the prefix of length k
    exterior: Vec<i32>,
}

enum Frame {
    Paired(usize, usize),
    Multi(usize, usize),
}

impl<'a> DpTables<'a> {
    fn fill(seq: &'a [u8], max_loop: usize) -> Self {
        let n = seq.len();
        let mut tables = DpTables {
            seq,
            n,
            max_loop,
            v: vec![vec![INF; n]; n],
            wm: vec![vec![INF; n]; n],
            exterior: vec![0; n + 1],
        };

        for span in 1..n {
            for i in 0..n - span {
                let j = i + span;
                tables.v[i][j] = tables.best_paired(i, j);
                tables.wm[i][j] = tables.best_multi(i, j);
            }
        }

        for j in 0..n {
            let mut best = tables.exterior[j];
            for i in 0..=j {
                if tables.v[i][j] < INF {
                    let candidate = tables.exterior[i] + tables.v[i][j] + tables.terminal(i, j);
                    if candidate < best {
                        best = candidate;
                    }
                }
            }
            tables.exterior[j + 1] = best;
        }

        tables
    }

    fn pair(&self, i: usize, j: usize) -> Option<Pair> {
        Pair::of(self.seq[i], self.seq[j])
    }

    fn terminal(&self, i: usize, j: usize) -> i32 {
        self.pair(i, j).map(Pair::terminal_penalty).unwrap_or(0)
    }

    fn hairpin(&self, i: usize, j: usize) -> i32 {
        hairpin_initiation(j - i - 1) + self.terminal(i, j)
    }

    /// Energy of the loop closed by (i, j) with inner pair (p, q).
    fn two_loop(&self, i: usize, j: usize, p: usize, q: usize) -> i32 {
        let (Some(outer), Some(inner)) = (self.pair(i, j), self.pair(p, q)) else {
            return INF;
        };
        let left = p - i - 1;
        let right = j - q - 1;
        match (left, right) {
            (0, 0) => stack_energy(outer, inner),
            (0, k) | (k, 0) if k == 1 => bulge_initiation(1) + stack_energy(outer, inner),
            (0, k) | (k, 0) => {
                bulge_initiation(k) + outer.terminal_penalty() + inner.terminal_penalty()
            }
            (l, r) => {
                let asymmetry = (60 * (l as i32 - r as i32).abs()).min(300);
                interior_initiation(l + r)
                    + asymmetry
                    + outer.terminal_penalty()
                    + inner.terminal_penalty()
            }
        }
    }

    /// Inner pairs (p, q) reachable from (i, j) within the loop size limit.
    fn inner_pairs(&self, i: usize, j: usize) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        for p in (i + 1)..j {
            let left = p - i - 1;
            if left > self.max_loop {
                break;
            }
            for q in ((p + MIN_HAIRPIN + 1)..j).rev() {
                let right = j - q - 1;
                if left + right > self.max_loop {
                    break;
                }
                pairs.push((p, q));
            }
        }
        pairs
    }

    fn best_paired(&self, i: usize, j: usize) -> i32 {
        if j - i <= MIN_HAIRPIN || self.pair(i, j).is_none() {
            return INF;
        }
        let mut best = self.hairpin(i, j);

        for (p, q) in self.inner_pairs(i, j) {
            if self.v[p][q] < INF {
                let candidate = self.two_loop(i, j, p, q) + self.v[p][q];
                if candidate < best {
                    best = candidate;
                }
            }
        }

        if let Some(candidate) = self.best_multiloop_split(i, j).map(|(_, e)| e) {
            if candidate < best {
                best = candidate;
            }
        }
        best
    }

    /// Best split k for a multiloop closed by (i, j): WM[i+1][k-1] + WM[k][j-1].
    fn best_multiloop_split(&self, i: usize, j: usize) -> Option<(usize, i32)> {
        let mut best: Option<(usize, i32)> = None;
        for k in (i + 2)..j {
            let left = self.wm[i + 1][k - 1];
            let right = self.wm[k][j - 1];
            if left >= INF || right >= INF {
                continue;
            }
            let energy = ML_CLOSING + ML_BRANCH + self.terminal(i, j) + left + right;
            if best.map_or(true, |(_, e)| energy < e) {
                best = Some((k, energy));
            }
        }
        best
    }

    fn best_multi(&self, i: usize, j: usize) -> i32 {
        let mut best = INF;
        if self.v[i][j] < INF {
            best = best.min(self.v[i][j] + ML_BRANCH + self.terminal(i, j));
        }
        // callers guarantee i < j
        if self.wm[i + 1][j] < INF {
            best = best.min(self.wm[i + 1][j] + ML_UNPAIRED);
        }
        if self.wm[i][j - 1] < INF {
            best = best.min(self.wm[i][j - 1] + ML_UNPAIRED);
        }
        for k in (i + 1)..=j {
            let left = self.wm[i][k - 1];
            let right = self.wm[k][j];
            if left < INF && right < INF {
                best = best.min(left + right);
            }
        }
        best
    }

    fn traceback(&self) -> Result<String> {
        let mut structure = vec![b'.'; self.n];
        let mut stack: Vec<Frame> = Vec::new();

        let mut j = self.n;
        while j > 0 {
            if self.exterior[j] == self.exterior[j - 1] {
                j -= 1;
                continue;
            }
            let end = j - 1;
            let start = (0..=end).find(|&i| {
                self.v[i][end] < INF
                    && self.exterior[i] + self.v[i][end] + self.terminal(i, end) == self.exterior[j]
            });
            match start {
                Some(i) => {
                    stack.push(Frame::Paired(i, end));
                    j = i;
                }
                None => return Err(traceback_error("exterior", 0, end)),
            }
        }

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Paired(i, j) => {
                    structure[i] = b'(';
                    structure[j] = b')';
                    let target = self.v[i][j];
                    if target == self.hairpin(i, j) {
                        continue;
                    }
                    let inner = self.inner_pairs(i, j).into_iter().find(|&(p, q)| {
                        self.v[p][q] < INF && self.two_loop(i, j, p, q) + self.v[p][q] == target
                    });
                    if let Some((p, q)) = inner {
                        stack.push(Frame::Paired(p, q));
                        continue;
                    }
                    match self.best_multiloop_split(i, j) {
                        Some((k, energy)) if energy == target => {
                            stack.push(Frame::Multi(i + 1, k - 1));
                            stack.push(Frame::Multi(k, j - 1));
                        }
                        _ => return Err(traceback_error("paired", i, j)),
                    }
                }
                Frame::Multi(i, j) => {
                    let target = self.wm[i][j];
                    let branch = self.v[i][j];
                    let drop_left = if i < j { self.wm[i + 1][j] } else { INF };
                    let drop_right = if i < j { self.wm[i][j - 1] } else { INF };
                    if branch < INF && branch + ML_BRANCH + self.terminal(i, j) == target {
                        stack.push(Frame::Paired(i, j));
                    } else if drop_left < INF && drop_left + ML_UNPAIRED == target {
                        stack.push(Frame::Multi(i + 1, j));
                    } else if drop_right < INF && drop_right + ML_UNPAIRED == target {
                        stack.push(Frame::Multi(i, j - 1));
                    } else {
                        let split = ((i + 1)..=j).find(|&k| {
                            let left = self.wm[i][k - 1];
                            let right = self.wm[k][j];
                            left < INF && right < INF && left + right == target
                        });
                        match split {
                            Some(k) => {
                                stack.push(Frame::Multi(i, k - 1));
                                stack.push(Frame::Multi(k, j));
                            }
                            None => return Err(traceback_error("multiloop", i, j)),
                        }
                    }
                }
            }
        }

        Ok(String::from_utf8(structure).unwrap_or_default())
    }
}

fn traceback_error(region: &str, i: usize, j: usize) -> AptamyxError {
    AptamyxError::Other(anyhow::anyhow!(
        "folding traceback found no decomposition for {region} region ({i}, {j})"
    ))
}

// ── RNAfold ──────────────────────────────────────────────────────────────────

/// ViennaRNA `RNAfold --noPS`, sequence on stdin.
#[derive(Debug, Clone)]
pub struct RnaFoldCli {
    tool: ExternalTool,
    output_pattern: Regex,
}

impl RnaFoldCli {
    pub fn new<P: AsRef<Path>>(executable: P, timeout: Duration) -> Self {
        Self {
            tool: ExternalTool::new(executable, timeout),
            output_pattern: Regex::new(r"^([().]+)\s+\(\s*(-?\d+(?:\.\d+)?)\s*\)")
                .expect("static RNAfold pattern"),
        }
    }

    fn parse_output(&self, stdout: &str, expected_len: usize) -> Result<SecondaryStructure> {
        let unparseable = |detail: String| {
            AptamyxError::Tool(ToolFailure::Unparseable {
                executable: self.tool.executable().display().to_string(),
                detail,
            })
        };
        let line = stdout
            .lines()
            .nth(1)
            .ok_or_else(|| unparseable(format!("expected two lines, got: {}", stdout.trim())))?;
        let caps = self
            .output_pattern
            .captures(line.trim())
            .ok_or_else(|| unparseable(format!("unrecognised structure line: {line}")))?;
        let dot_bracket = caps[1].to_string();
        if dot_bracket.len() != expected_len {
            return Err(unparseable(format!(
                "structure length {} does not match sequence length {}",
                dot_bracket.len(),
                expected_len
            )));
        }
        let mfe = caps[2]
            .parse::<f64>()
            .map_err(|e| unparseable(format!("energy '{}': {e}", &caps[2])))?;
        Ok(SecondaryStructure { dot_bracket, mfe })
    }
}

#[async_trait]
impl FoldingEngine for RnaFoldCli {
    fn name(&self) -> &str {
        "RNAfold"
    }

    async fn fold(&self, rna: &RnaSequence) -> Result<SecondaryStructure> {
        if rna.is_empty() {
            return Err(AptamyxError::Input("cannot fold an empty sequence".into()));
        }
        let input = format!("{}\n", rna.as_str());
        let output = self.tool.run_with_input(["--noPS"], input.as_bytes(), None).await?;
        debug!(sequence = %rna.as_str(), stdout = %output.stdout.trim(), "RNAfold finished");
        self.parse_output(&output.stdout, rna.len())
    }
}

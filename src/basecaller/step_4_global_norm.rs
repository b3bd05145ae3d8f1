// Internal imports
use crate::error::{GruPruneError, Result};

/// # Transition Matrix
///
/// Flip-flop scores for `nblock` consecutive blocks, `nparam` scores per
/// block, stored row-major.
///
/// ## Layout of one block
///
/// There are `2 * nbase` states: flip states `0..nbase` and flop states
/// `nbase..2 * nbase`.
///
/// - into flip `b` from any state `p`: index `b * 2 * nbase + p`
/// - into flop `b` from flip `b`: index `2 * nbase * nbase + b`
/// - flop `b` staying in flop `b`: index `2 * nbase * nbase + nbase + b`
///
/// giving `nparam = 2 * nbase * (nbase + 1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionMatrix {
    pub nblock: usize,
    pub nparam: usize,
    pub nbase: usize,
    pub scores: Vec<f32>,
}

impl TransitionMatrix {
    pub fn new(scores: Vec<f32>, nparam: usize) -> Result<Self> {
        let nbase = nbase_from_nparam(nparam)?;
        if scores.len() % nparam != 0 {
            return Err(GruPruneError::InvalidFlipFlopSize(scores.len()));
        }
        Ok(Self {
            nblock: scores.len() / nparam,
            nparam,
            nbase,
            scores,
        })
    }

    pub fn block(&self, index: usize) -> &[f32] {
        &self.scores[index * self.nparam..(index + 1) * self.nparam]
    }
}

pub fn nparam_from_nbase(nbase: usize) -> usize {
    2 * nbase * (nbase + 1)
}

/// Inverts `nparam = 2 * nbase * (nbase + 1)`.
pub fn nbase_from_nparam(nparam: usize) -> Result<usize> {
    let estimate = (((1.0 + 2.0 * nparam as f64).sqrt() - 1.0) / 2.0).round() as usize;
    if estimate == 0 || nparam_from_nbase(estimate) != nparam {
        return Err(GruPruneError::InvalidFlipFlopSize(nparam));
    }
    Ok(estimate)
}

#[inline]
fn logaddexp(a: f32, b: f32) -> f32 {
    if a == f32::NEG_INFINITY {
        return b;
    }
    if b == f32::NEG_INFINITY {
        return a;
    }
    let m = a.max(b);
    m + ((a - m).exp() + (b - m).exp()).ln()
}

pub fn logsumexp(values: &[f32]) -> f32 {
    let m = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if m == f32::NEG_INFINITY {
        return m;
    }
    m + values.iter().map(|&v| (v - m).exp()).sum::<f32>().ln()
}

/// One step of the forward recursion in log space.
///
/// `prev` and `next` hold `2 * nbase` state scores, `block` one block of transitions.
pub fn forward_block(prev: &[f32], block: &[f32], nbase: usize, next: &mut [f32]) {
    let nstate = 2 * nbase;
    let flop_offset = nstate * nbase;
    for b in 0..nbase {
        let row = &block[b * nstate..(b + 1) * nstate];
        next[b] = prev
            .iter()
            .zip(row)
            .fold(f32::NEG_INFINITY, |acc, (&p, &t)| logaddexp(acc, p + t));
    }
    for b in 0..nbase {
        let from_flip = prev[b] + block[flop_offset + b];
        let stay_flop = prev[nbase + b] + block[flop_offset + nbase + b];
        next[nbase + b] = logaddexp(from_flip, stay_flop);
    }
}

fn check_shape(scores: &[f32], nbase: usize) -> Result<usize> {
    let nparam = nparam_from_nbase(nbase);
    if nbase == 0 || scores.len() % nparam != 0 {
        return Err(GruPruneError::InvalidFlipFlopSize(scores.len()));
    }
    Ok(nparam)
}

/// Log partition function of `scores` over all paths, starting from a zero
/// score in every state.
pub fn log_partition(scores: &[f32], nbase: usize) -> Result<f32> {
    let nparam = check_shape(scores, nbase)?;
    let nstate = 2 * nbase;
    let mut fwd = vec![0.0f32; nstate];
    let mut next = vec![0.0f32; nstate];
    for block in scores.chunks_exact(nparam) {
        forward_block(&fwd, block, nbase, &mut next);
        std::mem::swap(&mut fwd, &mut next);
    }
    Ok(logsumexp(&fwd))
}

/// # Global Normalisation
///
/// Rescales flip-flop scores in place so that the scores of all paths through
/// the whole sequence sum to one in probability space.
///
/// The forward recursion starts from zero in every state. After each block the
/// log-sum of the forward vector is subtracted from both the forward vector and
/// every score of that block, which keeps the recursion bounded and leaves the
/// log partition function of the result at zero.
///
/// # Returns
///
/// The total amount removed, i.e. the log partition function of the input
pub fn global_norm(scores: &mut [f32], nbase: usize) -> Result<f32> {
    let nparam = check_shape(scores, nbase)?;
    let nstate = 2 * nbase;
    let mut fwd = vec![0.0f32; nstate];
    let mut next = vec![0.0f32; nstate];
    let mut total = 0.0f32;

    for block in scores.chunks_exact_mut(nparam) {
        forward_block(&fwd, block, nbase, &mut next);
        let norm = logsumexp(&next);
        for v in next.iter_mut() {
            *v -= norm;
        }
        for v in block.iter_mut() {
            *v -= norm;
        }
        std::mem::swap(&mut fwd, &mut next);
        total += norm;
    }
    Ok(total)
}

// Internal imports
use super::step_4_global_norm::TransitionMatrix;
use crate::constants::BASES;
use crate::error::{GruPruneError, Result};

/// # Viterbi Decoding
///
/// Finds the best-scoring state path through a flip-flop transition matrix,
/// using the same transition layout as the forward recursion.
///
/// # Returns
///
/// The path score and `nblock + 1` states: the initial state followed by the
/// state after each block
pub fn decode(transitions: &TransitionMatrix) -> Result<(f32, Vec<usize>)> {
    let nbase = transitions.nbase;
    if nbase == 0 || nbase > BASES.len() {
        return Err(GruPruneError::InvalidFlipFlopSize(transitions.nparam));
    }
    let nstate = 2 * nbase;
    let flop_offset = nstate * nbase;

    let mut score = vec![0.0f32; nstate];
    let mut next = vec![0.0f32; nstate];
    let mut traceback: Vec<usize> = Vec::with_capacity(transitions.nblock * nstate);

    for blk in 0..transitions.nblock {
        let block = transitions.block(blk);
        for b in 0..nbase {
            let row = &block[b * nstate..(b + 1) * nstate];
            let (from, best) = score
                .iter()
                .zip(row)
                .map(|(&s, &t)| s + t)
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |acc, (p, v)| if v > acc.1 { (p, v) } else { acc });
            next[b] = best;
            traceback.push(from);
        }
        for b in 0..nbase {
            let from_flip = score[b] + block[flop_offset + b];
            let stay_flop = score[nbase + b] + block[flop_offset + nbase + b];
            if stay_flop > from_flip {
                next[nbase + b] = stay_flop;
                traceback.push(nbase + b);
            } else {
                next[nbase + b] = from_flip;
                traceback.push(b);
            }
        }
        std::mem::swap(&mut score, &mut next);
    }

    let (mut state, best) = score
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |acc, (s, v)| if v > acc.1 { (s, v) } else { acc });

    let mut path = vec![0usize; transitions.nblock + 1];
    path[transitions.nblock] = state;
    for blk in (0..transitions.nblock).rev() {
        state = traceback[blk * nstate + state];
        path[blk] = state;
    }
    Ok((best, path))
}

/// Emits a base for the first state and for every change of state.
///
/// Flip and flop states of the same base decode to the same letter, so a
/// flip-to-flop move of `A` is how a homopolymer `AA` is represented.
pub fn states_to_sequence(path: &[usize], nbase: usize) -> String {
    let mut sequence = String::with_capacity(path.len() / 2);
    let mut previous: Option<usize> = None;
    for &state in path {
        if previous != Some(state) {
            sequence.push(BASES[state % nbase]);
        }
        previous = Some(state);
    }
    sequence
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basecaller::step_4_global_norm::nparam_from_nbase;

    /// Transition scores that strongly prefer one `(to, from)` move per block.
    fn forced_path(moves: &[(usize, usize)], nbase: usize) -> TransitionMatrix {
        let nparam = nparam_from_nbase(nbase);
        let nstate = 2 * nbase;
        let mut scores = vec![-10.0f32; nparam * moves.len()];
        for (blk, &(to, from)) in moves.iter().enumerate() {
            let index = if to < nbase {
                to * nstate + from
            } else if from == to {
                nstate * nbase + nbase + (to - nbase)
            } else {
                nstate * nbase + (to - nbase)
            };
            scores[blk * nparam + index] = 0.0;
        }
        TransitionMatrix::new(scores, nparam).unwrap()
    }

    #[test]
    fn test_decode_follows_forced_moves() {
        // A -> A(stay) -> C -> c (flop) -> G
        let transitions = forced_path(&[(0, 0), (1, 0), (5, 1), (2, 5)], 4);
        let (score, path) = decode(&transitions).unwrap();
        assert_eq!(path, vec![0, 0, 1, 5, 2]);
        assert!(score.abs() < 1e-6);
        assert_eq!(states_to_sequence(&path, 4), "ACCG");
    }

    #[test]
    fn test_states_to_sequence_collapses_stays() {
        assert_eq!(states_to_sequence(&[3, 3, 3, 7, 7, 3], 4), "TTT");
        assert_eq!(states_to_sequence(&[], 4), "");
    }
}

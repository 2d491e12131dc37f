//! Per-(session, signerIndex) monotonic sequence admission.
//!
//! Sequence numbers live in [`crate::p2p::P2PMetadata::last_sequence_numbers`]
//! — there is no separate global table — so admission is a set of pure
//! functions over that map rather than a stateful guard object.

use std::collections::HashMap;

use crate::error::Musig2Error;

/// Checks and, on success, records a newly admitted sequence number for
/// `signer_index`. Rejects non-increasing sequence numbers, gaps wider
/// than `max_gap`, and timestamps outside `±max_skew_ms` of `now_ms`.
pub fn admit(
    last_sequence_numbers: &mut HashMap<usize, u64>,
    signer_index: usize,
    sequence_number: u64,
    message_timestamp_ms: u64,
    now_ms: u64,
    max_gap: u64,
    max_skew_ms: u64,
) -> Result<(), Musig2Error> {
    let last = last_sequence_numbers.get(&signer_index).copied().unwrap_or(0);

    if sequence_number <= last {
        return Err(Musig2Error::ReplayOrReorder(format!(
            "signer {signer_index}: sequence {sequence_number} <= last accepted {last}"
        )));
    }

    if sequence_number - last > max_gap {
        return Err(Musig2Error::ReplayOrReorder(format!(
            "signer {signer_index}: sequence gap {} exceeds {max_gap}",
            sequence_number - last
        )));
    }

    let skew = message_timestamp_ms.abs_diff(now_ms);
    if skew > max_skew_ms {
        return Err(Musig2Error::ReplayOrReorder(format!(
            "signer {signer_index}: timestamp skew {skew}ms exceeds {max_skew_ms}ms"
        )));
    }

    last_sequence_numbers.insert(signer_index, sequence_number);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_strictly_increasing_sequence_numbers() {
        let mut table = HashMap::new();
        assert!(admit(&mut table, 0, 1, 1_000, 1_000, 100, 300_000).is_ok());
        assert!(admit(&mut table, 0, 2, 1_001, 1_001, 100, 300_000).is_ok());
    }

    #[test]
    fn rejects_replay_of_the_same_sequence_number() {
        let mut table = HashMap::new();
        admit(&mut table, 0, 5, 1_000, 1_000, 100, 300_000).unwrap();
        let err = admit(&mut table, 0, 5, 1_000, 1_000, 100, 300_000);
        assert!(matches!(err, Err(Musig2Error::ReplayOrReorder(_))));
    }

    #[test]
    fn rejects_sequence_gap_beyond_max() {
        let mut table = HashMap::new();
        admit(&mut table, 0, 1, 1_000, 1_000, 100, 300_000).unwrap();
        let err = admit(&mut table, 0, 1_000, 1_000, 1_000, 100, 300_000);
        assert!(matches!(err, Err(Musig2Error::ReplayOrReorder(_))));
    }

    #[test]
    fn rejects_timestamps_outside_skew_window() {
        let mut table = HashMap::new();
        let err = admit(&mut table, 0, 1, 0, 1_000_000, 100, 300_000);
        assert!(matches!(err, Err(Musig2Error::ReplayOrReorder(_))));
    }

    #[test]
    fn tracks_signers_independently() {
        let mut table = HashMap::new();
        admit(&mut table, 0, 1, 1_000, 1_000, 100, 300_000).unwrap();
        assert!(admit(&mut table, 1, 1, 1_000, 1_000, 100, 300_000).is_ok());
    }
}

//! Free position selection on a PON.

use gpon_session_common::{OltError, OltResult};
use std::collections::BTreeSet;

use crate::types::PonPort;

/// Lowest position in `1..=capacity` not present in `occupied`.
///
/// Deterministic for a given occupancy set, so a retried allocation on an
/// unchanged PON picks the same position.
pub fn lowest_free_position(occupied: &BTreeSet<u16>, capacity: u16) -> Option<u16> {
    (1..=capacity).find(|position| !occupied.contains(position))
}

/// Like [`lowest_free_position`], reporting exhaustion against `port`.
pub fn allocate(occupied: &BTreeSet<u16>, capacity: u16, port: PonPort) -> OltResult<u16> {
    lowest_free_position(occupied, capacity).ok_or_else(|| OltError::PositionExhausted {
        port: port.cli_path(),
        capacity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: impl IntoIterator<Item = u16>) -> BTreeSet<u16> {
        items.into_iter().collect()
    }

    #[test]
    fn test_empty_pon_starts_at_one() {
        assert_eq!(lowest_free_position(&set([]), 128), Some(1));
    }

    #[test]
    fn test_fills_first_gap() {
        assert_eq!(lowest_free_position(&set([1, 2, 4, 5]), 128), Some(3));
        assert_eq!(lowest_free_position(&set([2, 3]), 128), Some(1));
    }

    #[test]
    fn test_matches_set_difference_minimum() {
        for hole in [1u16, 17, 64, 127, 128] {
            let occupied = set((1..=128).filter(|p| *p != hole));
            assert_eq!(lowest_free_position(&occupied, 128), Some(hole));
        }
    }

    #[test]
    fn test_ignores_positions_beyond_capacity() {
        assert_eq!(lowest_free_position(&set([1, 2, 200]), 128), Some(3));
    }

    #[test]
    fn test_exhausted_pon() {
        let full = set(1..=128);
        assert_eq!(lowest_free_position(&full, 128), None);
        let err = allocate(&full, 128, PonPort::new(1, 2)).unwrap_err();
        assert!(matches!(
            err,
            OltError::PositionExhausted { ref port, capacity: 128 } if port == "1/1/1/2"
        ));
    }

    #[test]
    fn test_allocation_is_deterministic() {
        let occupied = set([1, 3, 5]);
        let first = allocate(&occupied, 128, PonPort::new(2, 2)).unwrap();
        let second = allocate(&occupied, 128, PonPort::new(2, 2)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, 2);
    }
}

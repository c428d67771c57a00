//! Latency bucketing.
//!
//! Groups one machine's endpoint pairs by their rounded target latency. Every
//! distinct rounded value becomes a [`LatencyClass`] with a dense 1-based id,
//! assigned in ascending value order so the result is deterministic no matter
//! how the input was ordered. Shaping state downstream scales with the number
//! of classes, not with the number of pairs.
//!
//! Latencies are rounded up to whole milliseconds, the resolution of the
//! delay emulation.

use std::collections::BTreeMap;
use std::ops::Range;

use thiserror::Error;

use crate::matrix::LatencyMatrix;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("latency matrix of size {size} is smaller than the endpoint count {endpoints}")]
pub struct MatrixTooSmall {
    pub size: usize,
    pub endpoints: usize,
}

/// A distinct rounded latency value among one machine's endpoint pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencyClass {
    /// Dense 1-based id, ascending with `delay_ms`. Doubles as the packet
    /// mark and the shaping class minor number.
    pub id: u16,
    /// Rounded delay in milliseconds.
    pub delay_ms: u64,
    /// Ordered (source, destination) global endpoint indices in this bucket.
    pub pairs: Vec<(usize, usize)>,
}

/// Buckets every ordered pair `(e, o)` with `e` owned by the machine,
/// `o != e`, and both below `total_endpoints`.
///
/// Owned slots at or above `total_endpoints` are padding from the ceiling
/// division and take no part in classification.
pub fn latency_classes(
    matrix: &LatencyMatrix,
    owned: Range<usize>,
    total_endpoints: usize,
) -> Result<Vec<LatencyClass>, MatrixTooSmall> {
    if total_endpoints > matrix.size() {
        return Err(MatrixTooSmall { size: matrix.size(), endpoints: total_endpoints });
    }

    let mut buckets: BTreeMap<u64, Vec<(usize, usize)>> = BTreeMap::new();
    for endpoint in owned {
        if endpoint >= total_endpoints {
            continue;
        }
        for other in 0..total_endpoints {
            if other == endpoint {
                continue;
            }
            let millis = matrix
                .get(endpoint, other)
                .ok_or(MatrixTooSmall { size: matrix.size(), endpoints: total_endpoints })?;
            buckets.entry(millis.ceil() as u64).or_default().push((endpoint, other));
        }
    }

    Ok(buckets
        .into_iter()
        .enumerate()
        .map(|(idx, (delay_ms, pairs))| LatencyClass { id: idx as u16 + 1, delay_ms, pairs })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_dense_and_ascend_with_delay() {
        // Endpoint 0 sees latencies 10, 2.5, 10 -> classes ceil(2.5)=3, 10.
        let matrix: LatencyMatrix = "0 10 2.5 10\n1 0 1 1\n1 1 0 1\n1 1 1 0\n".parse().unwrap();
        let classes = latency_classes(&matrix, 0..1, 4).unwrap();

        assert_eq!(classes.len(), 2);
        assert_eq!(classes[0].id, 1);
        assert_eq!(classes[0].delay_ms, 3);
        assert_eq!(classes[0].pairs, vec![(0, 2)]);
        assert_eq!(classes[1].id, 2);
        assert_eq!(classes[1].delay_ms, 10);
        assert_eq!(classes[1].pairs, vec![(0, 1), (0, 3)]);
    }

    #[test]
    fn buckets_cover_every_ordered_pair_exactly_once() {
        let matrix: LatencyMatrix = "0 1 2 3\n1 0 2 3\n4 5 0 6\n7 8 9 0\n".parse().unwrap();
        let classes = latency_classes(&matrix, 1..3, 4).unwrap();

        let mut seen = HashSet::new();
        for class in &classes {
            for &pair in &class.pairs {
                assert!(seen.insert(pair), "pair {pair:?} in more than one bucket");
            }
        }

        let expected: HashSet<_> = (1..3)
            .flat_map(|e| (0..4).filter(move |&o| o != e).map(move |o| (e, o)))
            .collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn two_endpoint_scenario() {
        let matrix: LatencyMatrix = "0 1\n2 0\n".parse().unwrap();
        let classes = latency_classes(&matrix, 0..2, 2).unwrap();

        assert_eq!(classes.len(), 2);
        assert_eq!((classes[0].id, classes[0].delay_ms), (1, 1));
        assert_eq!(classes[0].pairs, vec![(0, 1)]);
        assert_eq!((classes[1].id, classes[1].delay_ms), (2, 2));
        assert_eq!(classes[1].pairs, vec![(1, 0)]);
    }

    #[test]
    fn padding_slots_are_ignored() {
        // 3 endpoints total, but the machine owns slots 2..4 from a ceiling
        // division; slot 3 is padding.
        let matrix: LatencyMatrix = "0 1 1\n1 0 1\n1 1 0\n".parse().unwrap();
        let classes = latency_classes(&matrix, 2..4, 3).unwrap();

        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].pairs, vec![(2, 0), (2, 1)]);
    }

    #[test]
    fn no_endpoints_yields_no_classes() {
        let matrix: LatencyMatrix = "0 1\n1 0\n".parse().unwrap();
        let classes = latency_classes(&matrix, 0..0, 2).unwrap();
        assert!(classes.is_empty());
    }

    #[test]
    fn undersized_matrix_is_rejected() {
        let matrix: LatencyMatrix = "0 1\n1 0\n".parse().unwrap();
        let err = latency_classes(&matrix, 0..3, 3).unwrap_err();
        assert_eq!(err, MatrixTooSmall { size: 2, endpoints: 3 });
    }
}

use crate::array::SortedIndex;
use crate::error::{Error, Result};
use std::cmp::Ordering;

/// Materialized non-decreasing data with binary-search queries.
#[derive(Debug, Clone, PartialEq)]
pub struct SortedArray<T> {
    data: Vec<T>,
}

impl<T: PartialOrd + Copy> SortedArray<T> {
    /// Fails with `UnsortedData` at the first element smaller than (or not
    /// comparable with) its predecessor.
    pub fn new(data: Vec<T>) -> Result<Self> {
        for (i, pair) in data.windows(2).enumerate() {
            match pair[0].partial_cmp(&pair[1]) {
                Some(Ordering::Less | Ordering::Equal) => {}
                _ => return Err(Error::UnsortedData { index: i + 1 }),
            }
        }
        Ok(Self { data })
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<T> {
        self.data
    }
}

impl<T: PartialOrd + Copy> SortedIndex for SortedArray<T> {
    type Item = T;

    fn len(&self) -> usize {
        self.data.len()
    }

    fn get(&self, index: usize) -> Option<T> {
        self.data.get(index).copied()
    }

    fn find_point(&self, value: T) -> usize {
        self.data.partition_point(|v| *v < value)
    }

    fn upper_bound(&self, value: T) -> usize {
        self.data.partition_point(|v| *v <= value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Selection;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn sample() -> SortedArray<i32> {
        SortedArray::new(vec![1, 2, 2, 2, 5, 7, 7, 9]).unwrap()
    }

    #[test]
    fn rejects_unsorted_input() {
        assert!(matches!(
            SortedArray::new(vec![1, 3, 2]),
            Err(Error::UnsortedData { index: 2 })
        ));
        assert!(matches!(
            SortedArray::new(vec![1.0, f64::NAN]),
            Err(Error::UnsortedData { index: 1 })
        ));
    }

    #[test]
    fn comparison_queries() {
        let a = sample();
        assert_eq!(a.indices_before(2), 0..1);
        assert_eq!(a.indices_through(2), 0..4);
        assert_eq!(a.indices_after(2), 4..8);
        assert_eq!(a.indices_from(2), 1..8);
        assert_eq!(a.indices_before(0), 0..0);
        assert_eq!(a.indices_after(10), 8..8);
    }

    #[test]
    fn equality_queries() {
        let a = sample();
        assert_eq!(a.find_equal(3), Selection::Empty);
        assert_eq!(a.find_equal(5), Selection::Index(4));
        assert_eq!(a.find_equal(2), Selection::Range(1..4));
        assert_eq!(a.range_equal(2, 5), Selection::Range(1..5));
        assert_eq!(a.range_equal(3, 4), Selection::Empty);
        assert_eq!(a.range_equal(8, 9), Selection::Index(7));
        assert_eq!(a.range_equal(9, 1), Selection::Empty);
    }

    #[test]
    fn union_and_complement() {
        let a = sample();
        assert_eq!(
            a.union_query(&[9, 1, 2, 3]),
            Selection::Union(vec![Selection::Range(0..4), Selection::Index(7)])
        );
        assert_eq!(a.union_query(&[5, 7]), Selection::Range(4..7));
        assert_eq!(a.union_query(&[]), Selection::Empty);

        assert_eq!(
            a.not_equal(5),
            Selection::Union(vec![Selection::Range(0..4), Selection::Range(5..8)])
        );
        assert_eq!(a.not_equal(1), Selection::Range(1..8));
        assert_eq!(a.not_equal(4), Selection::Range(0..8));
        assert_eq!(a.select(&a.not_equal(2)), vec![1, 5, 7, 7, 9]);
    }

    fn sorted_vec() -> impl Strategy<Value = Vec<i32>> {
        prop::collection::vec(-20i32..20, 0..40).prop_map(|mut v| {
            v.sort();
            v
        })
    }

    proptest! {
        #[test]
        fn find_point_matches_linear_scan(data in sorted_vec(), x in -25i32..25) {
            let expected = data.iter().position(|v| *v >= x).unwrap_or(data.len());
            let a = SortedArray::new(data).unwrap();
            prop_assert_eq!(a.find_point(x), expected);
        }

        #[test]
        fn before_equal_after_partition(data in sorted_vec(), x in -25i32..25) {
            let a = SortedArray::new(data).unwrap();
            let mut all: Vec<usize> = a.indices_before(x).collect();
            all.extend(a.find_equal(x).indices());
            all.extend(a.indices_after(x));
            prop_assert_eq!(all, (0..a.len()).collect::<Vec<_>>());
        }

        #[test]
        fn not_equal_complements_equal(data in sorted_vec(), x in -25i32..25) {
            let a = SortedArray::new(data).unwrap();
            let mut all = a.find_equal(x).indices();
            all.extend(a.not_equal(x).indices());
            all.sort();
            prop_assert_eq!(all, (0..a.len()).collect::<Vec<_>>());
        }

        #[test]
        fn union_covers_each_value(data in sorted_vec(), xs in prop::collection::vec(-25i32..25, 0..6)) {
            let a = SortedArray::new(data).unwrap();
            let got = a.union_query(&xs).indices();
            let expected: Vec<usize> = (0..a.len())
                .filter(|i| xs.contains(&a.as_slice()[*i]))
                .collect();
            prop_assert_eq!(got, expected);
        }
    }
}

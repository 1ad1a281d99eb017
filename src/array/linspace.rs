use crate::array::SortedIndex;
use crate::error::{Error, Result};

/// Evenly spaced values `start, start + step, ...` below `stop`, computed on
/// demand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinSpace {
    start: f64,
    stop: f64,
    step: f64,
    len: usize,
}

impl LinSpace {
    pub fn new(start: f64, stop: f64, step: f64) -> Result<Self> {
        if !(step.is_finite() && step > 0.0) {
            return Err(Error::InvalidStep { step });
        }
        let len = ((stop - start) / step).ceil().max(0.0) as usize;
        Ok(Self {
            start,
            stop,
            step,
            len,
        })
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn stop(&self) -> f64 {
        self.stop
    }

    pub fn step(&self) -> f64 {
        self.step
    }
}

impl SortedIndex for LinSpace {
    type Item = f64;

    fn len(&self) -> usize {
        self.len
    }

    fn get(&self, index: usize) -> Option<f64> {
        (index < self.len).then(|| self.start + self.step * index as f64)
    }

    /// The arithmetic estimate is corrected against `get`, so the result
    /// agrees with the materialized values under rounding.
    fn find_point(&self, value: f64) -> usize {
        let steps = ((value - self.start) / self.step).ceil();
        let mut i = if steps <= 0.0 {
            0
        } else {
            (steps as usize).min(self.len)
        };
        while i > 0 && self.get(i - 1).is_some_and(|x| x >= value) {
            i -= 1;
        }
        while self.get(i).is_some_and(|x| x < value) {
            i += 1;
        }
        i
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{Selection, SortedArray};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn zero_to_ten_by_two() {
        let a = LinSpace::new(0.0, 10.0, 2.0).unwrap();
        assert_eq!(a.len(), 5);
        assert_eq!(a.find_point(5.0), 3);
        assert_eq!(a.indices_before(4.0), 0..2);
        assert_eq!(a.indices_from(4.0), 2..5);
        assert_eq!(a.find_equal(4.0), Selection::Index(2));
        assert_eq!(a.find_equal(5.0), Selection::Empty);
        assert_eq!(a.select(&a.range_equal(2.0, 6.0)), vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn probes_outside_the_range_clamp() {
        let a = LinSpace::new(0.0, 10.0, 2.0).unwrap();
        assert_eq!(a.find_point(-3.0), 0);
        assert_eq!(a.find_point(100.0), 5);
        assert_eq!(a.indices_after(8.0), 5..5);
    }

    #[test]
    fn partial_last_step_is_included() {
        let a = LinSpace::new(0.0, 10.0, 3.0).unwrap();
        assert_eq!(a.len(), 4);
        assert_eq!(a.get(3), Some(9.0));
        assert_eq!(a.get(4), None);
    }

    #[test]
    fn agrees_with_materialized_array() {
        let lin = LinSpace::new(1.0, 20.0, 1.5).unwrap();
        let values: Vec<f64> = (0..lin.len()).filter_map(|i| lin.get(i)).collect();
        let arr = SortedArray::new(values).unwrap();
        for probe in [0.0, 1.0, 2.4, 2.5, 7.0, 19.0, 25.0] {
            assert_eq!(lin.find_point(probe), arr.find_point(probe), "probe {probe}");
        }
    }

    #[test]
    fn rounded_elements_are_found() {
        let a = LinSpace::new(0.0, 1.0, 0.1).unwrap();
        let x = a.get(3).unwrap();
        assert_eq!(a.find_point(x), 3);
        assert_eq!(a.find_equal(x), Selection::Index(3));
    }

    proptest! {
        #[test]
        fn find_point_matches_linear_scan(
            start in -100.0f64..100.0,
            width in 0.0f64..50.0,
            step in 0.01f64..3.0,
            probe in -150.0f64..200.0,
            pick in 0usize..64,
        ) {
            let a = LinSpace::new(start, start + width, step).unwrap();
            let scan = |v: f64| (0..a.len()).find(|&i| a.get(i).is_some_and(|x| x >= v)).unwrap_or(a.len());
            prop_assert_eq!(a.find_point(probe), scan(probe));
            if let Some(x) = a.get(pick.min(a.len().saturating_sub(1))) {
                prop_assert_eq!(a.find_point(x), scan(x));
                prop_assert!(!a.find_equal(x).is_empty());
            }
        }
    }

    #[test]
    fn step_must_be_positive() {
        assert!(matches!(LinSpace::new(0.0, 1.0, 0.0), Err(Error::InvalidStep { .. })));
        assert!(matches!(LinSpace::new(0.0, 1.0, -1.0), Err(Error::InvalidStep { .. })));
        assert_eq!(LinSpace::new(5.0, 1.0, 1.0).unwrap().len(), 0);
    }
}

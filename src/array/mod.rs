//! Index queries over non-decreasing data.
//!
//! `SortedIndex` implementors only supply `find_point` (first index whose
//! element is >= the probe); every query is derived from it. Queries return
//! index ranges or `Selection`s, never booleans.

pub mod linspace;
pub mod sorted;

pub use linspace::LinSpace;
pub use sorted::SortedArray;

use std::ops::Range;

/// Result of an equality-style query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Empty,
    Index(usize),
    Range(Range<usize>),
    /// Disjoint, non-touching parts in ascending order.
    Union(Vec<Selection>),
}

impl Selection {
    /// `Empty` for an empty range, `Index` for a single element.
    pub fn from_range(range: Range<usize>) -> Self {
        match range.len() {
            0 => Selection::Empty,
            1 => Selection::Index(range.start),
            _ => Selection::Range(range),
        }
    }

    /// Normalized union of `ranges`: sorted, overlapping or touching ranges
    /// merged, empty ranges dropped.
    pub fn from_ranges(mut ranges: Vec<Range<usize>>) -> Self {
        ranges.retain(|r| !r.is_empty());
        ranges.sort_by_key(|r| r.start);

        let mut merged: Vec<Range<usize>> = Vec::with_capacity(ranges.len());
        for r in ranges {
            match merged.last_mut() {
                Some(last) if r.start <= last.end => last.end = last.end.max(r.end),
                _ => merged.push(r),
            }
        }

        match merged.len() {
            0 => Selection::Empty,
            1 => Selection::from_range(merged.remove(0)),
            _ => Selection::Union(merged.into_iter().map(Selection::from_range).collect()),
        }
    }

    pub fn ranges(&self) -> Vec<Range<usize>> {
        match self {
            Selection::Empty => Vec::new(),
            Selection::Index(i) => vec![*i..*i + 1],
            Selection::Range(r) => vec![r.clone()],
            Selection::Union(parts) => parts.iter().flat_map(Selection::ranges).collect(),
        }
    }

    pub fn indices(&self) -> Vec<usize> {
        self.ranges().into_iter().flatten().collect()
    }

    pub fn len(&self) -> usize {
        self.ranges().iter().map(Range::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait SortedIndex {
    type Item: PartialOrd + Copy;

    fn len(&self) -> usize;

    fn get(&self, index: usize) -> Option<Self::Item>;

    /// First index whose element is >= `value`; `len()` if there is none.
    fn find_point(&self, value: Self::Item) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lower_bound(&self, value: Self::Item) -> usize {
        self.find_point(value)
    }

    /// One past the last occurrence of `value` (or `lower_bound` if absent).
    fn upper_bound(&self, value: Self::Item) -> usize {
        let mut i = self.find_point(value);
        while self.get(i).is_some_and(|v| v == value) {
            i += 1;
        }
        i
    }

    /// `< value`
    fn indices_before(&self, value: Self::Item) -> Range<usize> {
        0..self.lower_bound(value)
    }

    /// `<= value`
    fn indices_through(&self, value: Self::Item) -> Range<usize> {
        0..self.upper_bound(value)
    }

    /// `> value`
    fn indices_after(&self, value: Self::Item) -> Range<usize> {
        self.upper_bound(value)..self.len()
    }

    /// `>= value`
    fn indices_from(&self, value: Self::Item) -> Range<usize> {
        self.lower_bound(value)..self.len()
    }

    /// Every occurrence of `value`.
    fn find_equal(&self, value: Self::Item) -> Selection {
        Selection::from_range(self.lower_bound(value)..self.upper_bound(value))
    }

    /// Elements in `[lo, hi]`.
    fn range_equal(&self, lo: Self::Item, hi: Self::Item) -> Selection {
        let start = self.lower_bound(lo);
        let end = self.upper_bound(hi).max(start);
        Selection::from_range(start..end)
    }

    /// Occurrences of any of `values`, merged into ascending disjoint parts.
    fn union_query(&self, values: &[Self::Item]) -> Selection {
        let ranges = values
            .iter()
            .map(|v| self.lower_bound(*v)..self.upper_bound(*v))
            .collect();
        Selection::from_ranges(ranges)
    }

    /// Everything except the occurrences of `value`.
    fn not_equal(&self, value: Self::Item) -> Selection {
        let lo = self.lower_bound(value);
        let hi = self.upper_bound(value);
        Selection::from_ranges(vec![0..lo, hi..self.len()])
    }

    /// Gather the selected elements in selection order.
    fn select(&self, selection: &Selection) -> Vec<Self::Item> {
        selection
            .indices()
            .into_iter()
            .filter_map(|i| self.get(i))
            .collect()
    }
}

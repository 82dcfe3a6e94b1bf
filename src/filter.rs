use std::ops::{Bound, RangeBounds};

use crate::error::Result;

/// Where a key sits relative to a range over a sorted stream.
enum Position {
    Below,
    Inside,
    Above,
}

/// Restricts a sorted key/value stream to a key range. Entries below the
/// start are skipped; the first entry past the end terminates the stream,
/// so a bounded scan never drains its source.
pub struct RangeFilter<I, R> {
    inner: I,
    range: R,
}

impl<I, R> RangeFilter<I, R>
where
    I: Iterator<Item = Result<(Vec<u8>, Vec<u8>)>>,
    R: RangeBounds<Vec<u8>>,
{
    pub fn new(inner: I, range: R) -> Self {
        Self { inner, range }
    }

    fn locate(&self, key: &[u8]) -> Position {
        match self.range.start_bound() {
            Bound::Included(start) if key < start.as_slice() => return Position::Below,
            Bound::Excluded(start) if key <= start.as_slice() => return Position::Below,
            _ => {}
        }
        match self.range.end_bound() {
            Bound::Included(end) if key > end.as_slice() => Position::Above,
            Bound::Excluded(end) if key >= end.as_slice() => Position::Above,
            _ => Position::Inside,
        }
    }
}

impl<I, R> Iterator for RangeFilter<I, R>
where
    I: Iterator<Item = Result<(Vec<u8>, Vec<u8>)>>,
    R: RangeBounds<Vec<u8>>,
{
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok((key, value)) => match self.locate(&key) {
                    Position::Below => continue,
                    Position::Inside => return Some(Ok((key, value))),
                    Position::Above => return None,
                },
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corruption;

    fn source(keys: &[&str]) -> Vec<Result<(Vec<u8>, Vec<u8>)>> {
        keys.iter()
            .map(|k| Ok((k.as_bytes().to_vec(), b"v".to_vec())))
            .collect()
    }

    fn keys_of(filtered: RangeFilter<impl Iterator<Item = Result<(Vec<u8>, Vec<u8>)>>, impl RangeBounds<Vec<u8>>>) -> Vec<Vec<u8>> {
        filtered.map(|r| r.unwrap().0).collect()
    }

    #[test]
    fn test_half_open_range() {
        let data = source(&["a", "b", "c", "d", "e"]);
        let range = b"b".to_vec()..b"d".to_vec();
        let keys = keys_of(RangeFilter::new(data.into_iter(), range));
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_inclusive_range() {
        let data = source(&["a", "b", "c", "d"]);
        let range = b"b".to_vec()..=b"c".to_vec();
        let keys = keys_of(RangeFilter::new(data.into_iter(), range));
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_unbounded() {
        let data = source(&["a", "b"]);
        let keys = keys_of(RangeFilter::new(data.into_iter(), ..));
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_stops_at_end_bound() {
        // An error after the end bound must never surface.
        let data = vec![
            Ok((b"a".to_vec(), b"v".to_vec())),
            Ok((b"z".to_vec(), b"v".to_vec())),
            Err(corruption!("must not be reached")),
        ];
        let range = b"a".to_vec()..b"b".to_vec();
        let mut filtered = RangeFilter::new(data.into_iter(), range);
        assert_eq!(filtered.next().unwrap().unwrap().0, b"a".to_vec());
        assert!(filtered.next().is_none());
    }

    #[test]
    fn test_propagates_errors_inside_range() {
        let data = vec![
            Ok((b"b".to_vec(), b"v".to_vec())),
            Err(corruption!("bad block")),
        ];
        let mut filtered = RangeFilter::new(data.into_iter(), ..);
        assert!(filtered.next().unwrap().is_ok());
        assert!(filtered.next().unwrap().is_err());
    }
}

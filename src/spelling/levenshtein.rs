//! Levenshtein edit distance over Unicode scalar values.

use std::cmp::min;

/// Minimum number of single-character insertions, deletions and
/// substitutions turning `a` into `b`.
pub fn distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = min(min(prev[j + 1] + 1, curr[j] + 1), prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Distance between `a` and `b` if it is at most `max`.
///
/// Only cells within `max` of the diagonal are computed, and the scan stops
/// as soon as a whole row exceeds `max`, since row minima never decrease.
pub fn bounded_distance(a: &str, b: &str, max: usize) -> Option<usize> {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.len().abs_diff(b.len()) > max {
        return None;
    }
    if a.is_empty() || b.is_empty() {
        return Some(a.len().max(b.len()));
    }

    // Cells outside the band hold an unreachable value.
    let outside = max + 1;
    let mut prev: Vec<usize> = (0..=b.len()).map(|j| if j <= max { j } else { outside }).collect();
    let mut curr = vec![outside; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        let row = i + 1;
        let start = row.saturating_sub(max).max(1);
        let end = min(b.len(), row + max);

        curr.fill(outside);
        curr[0] = if row <= max { row } else { outside };
        let mut row_min = curr[0];

        for j in start..=end {
            let cost = usize::from(ca != b[j - 1]);
            let value = min(min(prev[j] + 1, curr[j - 1] + 1), prev[j - 1] + cost);
            curr[j] = value.min(outside);
            row_min = row_min.min(curr[j]);
        }

        if row_min > max {
            return None;
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    let result = prev[b.len()];
    (result <= max).then_some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance() {
        assert_eq!(distance("kitten", "sitting"), 3);
        assert_eq!(distance("", "abc"), 3);
        assert_eq!(distance("abc", ""), 3);
        assert_eq!(distance("whoosj", "whoosh"), 1);
        assert_eq!(distance("flaw", "lawn"), 2);
        assert_eq!(distance("héllo", "hello"), 1);
    }

    #[test]
    fn test_bounded_distance_agrees_within_bound() {
        let words = ["", "a", "ab", "abc", "kitten", "sitting", "mitten", "whoosh", "whoosj", "hsoohw"];
        for a in words {
            for b in words {
                let full = distance(a, b);
                for max in 0..4 {
                    let expected = (full <= max).then_some(full);
                    assert_eq!(bounded_distance(a, b, max), expected, "{a:?} {b:?} max {max}");
                }
            }
        }
    }
}

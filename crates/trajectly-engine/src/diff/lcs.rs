//! Longest-common-subsequence pairing over event signatures.

/// Matched index pairs (left, right) of a longest common subsequence.
pub fn lcs_pairs(left: &[String], right: &[String]) -> Vec<(usize, usize)> {
    let m = left.len();
    let n = right.len();
    let mut table = vec![vec![0usize; n + 1]; m + 1];

    for i in (0..m).rev() {
        for j in (0..n).rev() {
            table[i][j] = if left[i] == right[j] {
                1 + table[i + 1][j + 1]
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut pairs = Vec::new();
    let mut i = 0;
    let mut j = 0;
    while i < m && j < n {
        if left[i] == right[j] {
            pairs.push((i, j));
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sigs(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn test_identical_sequences() {
        let left = sigs(&["a", "b", "c"]);
        let pairs = lcs_pairs(&left, &left);
        assert_eq!(pairs, vec![(0, 0), (1, 1), (2, 2)]);
    }

    #[test]
    fn test_insertion_in_right() {
        let pairs = lcs_pairs(&sigs(&["a", "c"]), &sigs(&["a", "b", "c"]));
        assert_eq!(pairs, vec![(0, 0), (1, 2)]);
    }

    #[test]
    fn test_disjoint_sequences() {
        let pairs = lcs_pairs(&sigs(&["a"]), &sigs(&["b"]));
        assert!(pairs.is_empty());
    }
}

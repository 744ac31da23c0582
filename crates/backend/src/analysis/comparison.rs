//! Byte-level comparison of compiled against deployed runtime bytecode.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{error::CompareError, utils::decode_hex};

/// Tuning of the similarity computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonConfig {
    /// Largest DP table (in cells) for which the exact LCS is computed.
    pub max_exact_cells: usize,
    /// Half-width of the diagonal band used beyond `max_exact_cells`.
    pub band_width: usize,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self { max_exact_cells: 16 * 1024 * 1024, band_width: 1024 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub exact_match: bool,
    /// Percentage in `[0, 100]`.
    pub similarity: f64,
    pub compiled_size: usize,
    pub deployed_size: usize,
    /// Offset of the first differing byte. When one input is a prefix of the other, the length
    /// of the shorter one.
    pub first_divergence_offset: Option<usize>,
    /// Whether the similarity was computed with the banded approximation.
    pub approximate: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BytecodeComparator {
    config: ComparisonConfig,
}

impl BytecodeComparator {
    pub fn new(config: ComparisonConfig) -> Self {
        Self { config }
    }

    /// Compares two hex strings. Whitespace, a `0x` prefix and case are ignored.
    pub fn compare_hex(
        &self,
        compiled: &str,
        deployed: &str,
    ) -> Result<ComparisonResult, CompareError> {
        let decode = |input: &'static str, hex: &str| {
            decode_hex(hex).map_err(|reason| CompareError::Unreadable { input, reason })
        };
        self.compare(&decode("compiled", compiled)?, &decode("deployed", deployed)?)
    }

    pub fn compare(
        &self,
        compiled: &[u8],
        deployed: &[u8],
    ) -> Result<ComparisonResult, CompareError> {
        if compiled.is_empty() {
            return Err(CompareError::Empty("compiled"));
        }
        if deployed.is_empty() {
            return Err(CompareError::Empty("deployed"));
        }

        let result = if compiled == deployed {
            ComparisonResult {
                exact_match: true,
                similarity: 100.0,
                compiled_size: compiled.len(),
                deployed_size: deployed.len(),
                first_divergence_offset: None,
                approximate: false,
            }
        } else {
            let (common, approximate) = self.common_subsequence_len(compiled, deployed);
            ComparisonResult {
                exact_match: false,
                similarity: common as f64 / compiled.len().max(deployed.len()) as f64 * 100.0,
                compiled_size: compiled.len(),
                deployed_size: deployed.len(),
                first_divergence_offset: first_divergence(compiled, deployed),
                approximate,
            }
        };

        debug!(
            exact = result.exact_match,
            similarity = result.similarity,
            approximate = result.approximate,
            "compared bytecode"
        );
        Ok(result)
    }

    /// Length of the longest common subsequence, and whether it is a lower-bound approximation.
    fn common_subsequence_len(&self, a: &[u8], b: &[u8]) -> (usize, bool) {
        let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
        let (a, b) = (&a[prefix..], &b[prefix..]);
        let suffix = a.iter().rev().zip(b.iter().rev()).take_while(|(x, y)| x == y).count();
        let (a, b) = (&a[..a.len() - suffix], &b[..b.len() - suffix]);

        let cells = a.len().saturating_mul(b.len());
        if cells <= self.config.max_exact_cells {
            (prefix + suffix + lcs_len(a, b), false)
        } else {
            trace!(cells, "falling back to banded lcs");
            (prefix + suffix + banded_lcs_len(a, b, self.config.band_width), true)
        }
    }
}

/// Offset of the first differing byte, `min(len)` if one input is a prefix of the other, or
/// `None` if both are equal.
pub fn first_divergence(a: &[u8], b: &[u8]) -> Option<usize> {
    a.iter()
        .zip(b)
        .position(|(x, y)| x != y)
        .or_else(|| (a.len() != b.len()).then(|| a.len().min(b.len())))
}

/// Exact LCS length in `O(n * m)` time and `O(m)` space.
fn lcs_len(a: &[u8], b: &[u8]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];

    for x in a {
        for (j, y) in b.iter().enumerate() {
            cur[j + 1] = if x == y { prev[j] + 1 } else { prev[j + 1].max(cur[j]) };
        }
        std::mem::swap(&mut prev, &mut cur);
    }

    prev[b.len()]
}

/// LCS length restricted to a diagonal band. Every value is realized by an actual common
/// subsequence, so the result never exceeds the exact LCS.
fn banded_lcs_len(a: &[u8], b: &[u8], band_width: usize) -> usize {
    let (n, m) = (a.len(), b.len());
    // The band covers the length difference plus `band_width` on either side.
    let below = band_width + n.saturating_sub(m);
    let above = band_width + m.saturating_sub(n);

    let mut prev = vec![0usize; m + 1];
    let mut cur = vec![0usize; m + 1];

    for i in 1..=n {
        let lo = i.saturating_sub(below).max(1);
        let hi = (i + above).min(m);
        if lo > hi {
            std::mem::swap(&mut prev, &mut cur);
            continue;
        }

        cur[lo - 1] = 0;
        for j in lo..=hi {
            cur[j] =
                if a[i - 1] == b[j - 1] { prev[j - 1] + 1 } else { prev[j].max(cur[j - 1]) };
        }
        if hi < m {
            cur[hi + 1] = 0;
        }
        std::mem::swap(&mut prev, &mut cur);
    }

    prev.iter().copied().max().unwrap_or_default()
}

/// Outcome class of a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchClass {
    Exact,
    NearPerfect,
    Excellent,
    SignificantDifference,
}

impl Display for MatchClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Exact => "exact match",
            Self::NearPerfect => "near-perfect match",
            Self::Excellent => "excellent match",
            Self::SignificantDifference => "significant difference",
        })
    }
}

/// Thresholds that turn a similarity into a [`MatchClass`] and a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchPolicy {
    pub near_perfect: f64,
    pub excellent: f64,
    /// Whether a near-perfect match counts as verified.
    pub accept_near_perfect: bool,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self { near_perfect: 99.9, excellent: 99.0, accept_near_perfect: true }
    }
}

impl MatchPolicy {
    pub fn classify(&self, result: &ComparisonResult) -> MatchClass {
        if result.exact_match {
            MatchClass::Exact
        } else if result.similarity >= self.near_perfect {
            MatchClass::NearPerfect
        } else if result.similarity >= self.excellent {
            MatchClass::Excellent
        } else {
            MatchClass::SignificantDifference
        }
    }

    pub fn passes(&self, class: MatchClass) -> bool {
        match class {
            MatchClass::Exact => true,
            MatchClass::NearPerfect => self.accept_near_perfect,
            MatchClass::Excellent | MatchClass::SignificantDifference => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pseudo_random(len: usize, seed: u64) -> Vec<u8> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (state >> 33) as u8
            })
            .collect()
    }

    #[test]
    fn test_exact_match_ignores_formatting() {
        let comparator = BytecodeComparator::default();
        let result = comparator.compare_hex("0x6001600201", " 6001600201\n").unwrap();
        assert!(result.exact_match);
        assert_eq!(result.similarity, 100.0);
        assert_eq!(result.first_divergence_offset, None);

        let result = comparator.compare_hex("0xABCDEF", "abcdef").unwrap();
        assert!(result.exact_match);
    }

    #[test]
    fn test_single_byte_difference() {
        let result = BytecodeComparator::default().compare_hex("6001600201", "6001600301").unwrap();
        assert!(!result.exact_match);
        assert_eq!(result.first_divergence_offset, Some(3));
        assert!((result.similarity - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_prefix_divergence() {
        let result = BytecodeComparator::default().compare_hex("600160", "6001600201").unwrap();
        assert_eq!(result.first_divergence_offset, Some(3));
        assert!((result.similarity - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_empty_and_unreadable() {
        let comparator = BytecodeComparator::default();
        assert_eq!(comparator.compare_hex("0x", "60"), Err(CompareError::Empty("compiled")));
        assert_eq!(comparator.compare_hex("60", "  "), Err(CompareError::Empty("deployed")));
        assert!(matches!(
            comparator.compare_hex("60", "6g"),
            Err(CompareError::Unreadable { input: "deployed", .. })
        ));
    }

    #[test]
    fn test_differing_metadata_tail_is_near_perfect() {
        let compiled = pseudo_random(40_000, 7);
        let mut deployed = compiled.clone();
        let tail = deployed.len() - 32;
        for byte in &mut deployed[tail..] {
            *byte = !*byte;
        }

        let result = BytecodeComparator::default().compare(&compiled, &deployed).unwrap();
        assert!(!result.exact_match);
        assert!(result.similarity >= 99.9, "{}", result.similarity);
        assert_eq!(result.first_divergence_offset, Some(tail));

        let policy = MatchPolicy::default();
        assert_eq!(policy.classify(&result), MatchClass::NearPerfect);
        assert!(policy.passes(MatchClass::NearPerfect));
        let strict = MatchPolicy { accept_near_perfect: false, ..Default::default() };
        assert!(!strict.passes(strict.classify(&result)));
    }

    #[test]
    fn test_banded_lcs_is_a_lower_bound() {
        let a = pseudo_random(300, 1);
        let mut b = a.clone();
        b.insert(10, 0xaa);
        b.remove(200);
        b.extend([1, 2, 3]);

        let exact = lcs_len(&a, &b);
        assert_eq!(banded_lcs_len(&a, &b, 8), exact);
        let unrelated = pseudo_random(280, 2);
        assert!(banded_lcs_len(&a, &unrelated, 4) <= lcs_len(&a, &unrelated));

        let approximate = BytecodeComparator::new(ComparisonConfig {
            max_exact_cells: 0,
            band_width: 8,
        })
        .compare(&a, &b)
        .unwrap();
        assert!(approximate.approximate);
        let exact = BytecodeComparator::default().compare(&a, &b).unwrap();
        assert!(!exact.approximate);
        assert_eq!(approximate.similarity, exact.similarity);
    }

    #[test]
    fn test_classification_thresholds() {
        let policy = MatchPolicy::default();
        let with = |similarity| ComparisonResult {
            exact_match: false,
            similarity,
            compiled_size: 1,
            deployed_size: 1,
            first_divergence_offset: Some(0),
            approximate: false,
        };
        assert_eq!(policy.classify(&with(99.95)), MatchClass::NearPerfect);
        assert_eq!(policy.classify(&with(99.5)), MatchClass::Excellent);
        assert_eq!(policy.classify(&with(42.0)), MatchClass::SignificantDifference);
        assert!(!policy.passes(MatchClass::Excellent));
    }
}

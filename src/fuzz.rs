// 🔤 Fuzzy similarity scores on a 0-100 scale
//
// ratio:         Indel similarity of the whole strings, 200 * LCS / (len_a + len_b)
// partial_ratio: best ratio of the shorter string against every same-length
//                window of the longer one (plus the partial windows at both ends)
//
// Both operate on chars and are case-sensitive; callers lower-case first.

/// Full-string similarity
///
/// Example:
/// - ratio("acme helth", "acme health") ≈ 95.2
/// - ratio("", "") = 100
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    ratio_chars(&a, &b)
}

/// Substring-tolerant similarity
///
/// Example:
/// - partial_ratio("delta dental", "delta dental of california") = 100
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };

    if short.is_empty() {
        return if long.is_empty() { 100.0 } else { 0.0 };
    }

    let best = best_window(short, long);

    // Equal lengths: either string may serve as the window source
    if short.len() == long.len() && best < 100.0 {
        return best.max(best_window(long, short));
    }

    best
}

fn best_window(short: &[char], long: &[char]) -> f64 {
    let n = short.len();
    let m = long.len();
    let mut best: f64 = 0.0;

    // Windows hanging off the left edge
    for end in 1..n {
        best = best.max(ratio_chars(short, &long[..end]));
    }

    for start in 0..=(m - n) {
        best = best.max(ratio_chars(short, &long[start..start + n]));
        if best >= 100.0 {
            return 100.0;
        }
    }

    // Windows hanging off the right edge
    for start in (m - n + 1)..m {
        best = best.max(ratio_chars(short, &long[start..]));
    }

    best
}

fn ratio_chars(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }

    200.0 * lcs_length(a, b) as f64 / total as f64
}

/// Length of the longest common subsequence (two-row DP)
fn lcs_length(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

// ============================================================================
// TESTS
// ============================================================================

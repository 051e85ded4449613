//! Minimal single-splice text diff.

/// One contiguous replacement turning `prev` into `next`.
///
/// Offsets and lengths are in characters (NOT bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDiff {
    pub index: usize,
    pub remove: usize,
    pub insert: String,
}

/// Compute the replacement covering everything between the longest common
/// prefix and the longest common suffix.
pub fn text_diff(prev: &str, next: &str) -> TextDiff {
    let prev: Vec<char> = prev.chars().collect();
    let next: Vec<char> = next.chars().collect();

    let prefix = prev
        .iter()
        .zip(next.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let max_suffix = prev.len().min(next.len()) - prefix;
    let suffix = prev
        .iter()
        .rev()
        .zip(next.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    TextDiff {
        index: prefix,
        remove: prev.len() - prefix - suffix,
        insert: next[prefix..next.len() - suffix].iter().collect(),
    }
}

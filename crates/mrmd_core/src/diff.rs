//! Character-level edit scripts between two text snapshots.
//!
//! The coordinator uses these scripts to fold an externally-edited file back
//! into the live replica: instead of delete-all + insert-all (which breaks
//! CRDT merging), the minimal changed region is computed over Unicode code
//! points and replayed as targeted insert/delete operations. Operation IDs
//! for untouched content are preserved, so concurrent client edits still
//! merge correctly.

/// One step of an edit script, expressed in Unicode code points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOp {
    /// Keep the next `n` code points unchanged.
    Retain(usize),
    /// Delete the next `n` code points at the cursor.
    Delete(usize),
    /// Insert a string at the cursor.
    Insert(String),
}

/// Compute an edit script transforming `old` into `new`.
///
/// Uses the common prefix/suffix approach: everything outside the shared
/// prefix and suffix is replaced with a single delete + insert pair. The
/// returned script never contains empty operations; identical inputs yield
/// an empty script.
pub fn diff(old: &str, new: &str) -> Vec<EditOp> {
    if old == new {
        return Vec::new();
    }

    let old_chars: Vec<char> = old.chars().collect();
    let new_chars: Vec<char> = new.chars().collect();

    // Find common prefix length
    let common_prefix = old_chars
        .iter()
        .zip(new_chars.iter())
        .take_while(|(a, b)| a == b)
        .count();

    // Find common suffix length (but don't overlap with prefix)
    let remaining_old = old_chars.len() - common_prefix;
    let remaining_new = new_chars.len() - common_prefix;
    let common_suffix = old_chars[common_prefix..]
        .iter()
        .rev()
        .zip(new_chars[common_prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .take(remaining_old.min(remaining_new))
        .count();

    let delete_len = old_chars.len() - common_suffix - common_prefix;
    let insert_end = new_chars.len() - common_suffix;

    let mut script = Vec::with_capacity(4);
    if common_prefix > 0 {
        script.push(EditOp::Retain(common_prefix));
    }
    if delete_len > 0 {
        script.push(EditOp::Delete(delete_len));
    }
    if insert_end > common_prefix {
        let inserted: String = new_chars[common_prefix..insert_end].iter().collect();
        script.push(EditOp::Insert(inserted));
    }
    if common_suffix > 0 {
        script.push(EditOp::Retain(common_suffix));
    }
    script
}

/// Apply a script to a plain string. Used by tests and for sanity checks;
/// the replica has its own transactional application path.
pub fn apply(old: &str, script: &[EditOp]) -> String {
    let old_chars: Vec<char> = old.chars().collect();
    let mut out = String::with_capacity(old.len());
    let mut cursor = 0usize;
    for op in script {
        match op {
            EditOp::Retain(n) => {
                out.extend(&old_chars[cursor..cursor + n]);
                cursor += n;
            }
            EditOp::Delete(n) => {
                cursor += n;
            }
            EditOp::Insert(s) => {
                out.push_str(s);
            }
        }
    }
    out.extend(&old_chars[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(old: &str, new: &str) {
        let script = diff(old, new);
        assert_eq!(apply(old, &script), new, "script {:?}", script);
    }

    #[test]
    fn test_identical_yields_empty_script() {
        assert!(diff("same", "same").is_empty());
        assert!(diff("", "").is_empty());
    }

    #[test]
    fn test_insert_into_empty() {
        let script = diff("", "hello");
        assert_eq!(script, vec![EditOp::Insert("hello".to_string())]);
    }

    #[test]
    fn test_delete_everything() {
        let script = diff("hello", "");
        assert_eq!(script, vec![EditOp::Delete(5)]);
    }

    #[test]
    fn test_middle_replacement() {
        let script = diff("Hello World", "Hello Brave World");
        assert_eq!(
            script,
            vec![
                EditOp::Retain(6),
                EditOp::Insert("Brave ".to_string()),
                EditOp::Retain(5),
            ]
        );
        roundtrip("Hello World", "Hello Brave World");
    }

    #[test]
    fn test_prefix_and_suffix_overlap() {
        // "aaa" -> "aa": suffix must not overlap the prefix
        roundtrip("aaa", "aa");
        roundtrip("aa", "aaa");
        roundtrip("abab", "ab");
    }

    #[test]
    fn test_unicode_code_points() {
        roundtrip("héllo wörld", "héllo wörld!");
        roundtrip("日本語テキスト", "日本語のテキスト");
        roundtrip("emoji 🎉 here", "emoji 🚀🎉 here");
    }

    #[test]
    fn test_full_replacement() {
        let script = diff("abc", "xyz");
        assert_eq!(
            script,
            vec![EditOp::Delete(3), EditOp::Insert("xyz".to_string())]
        );
    }

    #[test]
    fn test_counts_are_code_points_not_bytes() {
        let script = diff("ééé", "éé");
        assert_eq!(script, vec![EditOp::Retain(2), EditOp::Delete(1)]);
    }
}

//! Canonical string folding and structured-memory digest encoding.
//!
//! Strings are folded with Unicode NFKC normalization, a POSIX-locale case
//! fold, and diacritic stripping, then whitespace-collapsed, so that aliases
//! and lookups match regardless of source formatting or accent marks.
//! Numeric/boolean/byte encodings are fixed-width little-endian, with
//! explicit tag bytes so that adding new object kinds later can never
//! invalidate digests computed today.

use crate::memory::ObjectValue;
use sha2::{Digest, Sha256};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// NFKC-normalize, case-fold, diacritic-fold (drop combining marks), and
/// collapse internal whitespace runs to a single space, trimming
/// leading/trailing whitespace.
pub fn canonical_fold(input: &str) -> String {
    // Compatibility-decompose first so precomposed diacritics (e.g. the
    // single codepoint "é") split into base letter + combining mark, then
    // drop every combining mark (Unicode category Mn). What remains is
    // already in canonical (composed) form since there's nothing left to
    // recompose.
    let stripped: String = input.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    let folded = stripped.to_lowercase();
    let mut out = String::with_capacity(folded.len());
    let mut last_was_space = false;
    for c in folded.chars() {
        if c.is_whitespace() {
            if !last_was_space && !out.is_empty() {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Encode an [`ObjectValue`] into its tagged canonical byte form.
fn encode_object(object: &ObjectValue) -> Vec<u8> {
    let mut buf = vec![object.kind_tag()];
    match object {
        ObjectValue::Str(s) => buf.extend_from_slice(canonical_fold(s).as_bytes()),
        ObjectValue::Int(i) => buf.extend_from_slice(&i.to_le_bytes()),
        ObjectValue::Float(f) => {
            let v = if *f == 0.0 { 0.0_f64 } else { *f };
            buf.extend_from_slice(&v.to_bits().to_le_bytes());
        }
        ObjectValue::Bool(b) => buf.push(*b as u8),
        ObjectValue::Bytes(b) => buf.extend_from_slice(b),
        ObjectValue::TimeMs(t) => buf.extend_from_slice(&t.to_le_bytes()),
        ObjectValue::EntityRef(e) => buf.extend_from_slice(&e.get().to_le_bytes()),
    }
    buf
}

/// Compute the 32-byte fact digest: `SHA256(subject_key || predicate_key || tagged_object)`.
pub fn fact_digest(subject_key: &str, predicate_key: &str, object: &ObjectValue) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update((subject_key.len() as u32).to_le_bytes());
    hasher.update(canonical_fold(subject_key).as_bytes());
    hasher.update((predicate_key.len() as u32).to_le_bytes());
    hasher.update(canonical_fold(predicate_key).as_bytes());
    hasher.update(encode_object(object));
    hasher.finalize().into()
}

/// Compute the 32-byte span-key digest:
/// `SHA256(fact_id || valid_from || valid_to.unwrap_or(-1) || system_from)`.
///
/// Stable under retraction since `system_to` is never part of the key.
pub fn span_key_digest(
    fact_id: u64,
    valid_from_ms: i64,
    valid_to_ms: Option<i64>,
    system_from_ms: i64,
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(fact_id.to_le_bytes());
    hasher.update(valid_from_ms.to_le_bytes());
    hasher.update(valid_to_ms.unwrap_or(-1).to_le_bytes());
    hasher.update(system_from_ms.to_le_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_case_and_whitespace() {
        assert_eq!(canonical_fold("  Hello   World  "), "hello world");
    }

    #[test]
    fn folds_diacritics_by_stripping_combining_marks() {
        assert_eq!(canonical_fold("Café"), "cafe");
        assert_eq!(canonical_fold("CAFE"), "cafe");
    }

    #[test]
    fn fact_digest_is_deterministic() {
        let a = fact_digest("u:alice", "email", &ObjectValue::Str("a@x".into()));
        let b = fact_digest("u:alice", "email", &ObjectValue::Str("a@x".into()));
        assert_eq!(a, b);
    }

    #[test]
    fn fact_digest_varies_with_object() {
        let a = fact_digest("u:alice", "email", &ObjectValue::Str("a@x".into()));
        let b = fact_digest("u:alice", "email", &ObjectValue::Str("a@y".into()));
        assert_ne!(a, b);
    }

    #[test]
    fn negative_zero_folds_to_positive_zero() {
        let a = fact_digest("s", "p", &ObjectValue::Float(0.0));
        let b = fact_digest("s", "p", &ObjectValue::Float(-0.0));
        assert_eq!(a, b);
    }

    #[test]
    fn span_key_stable_under_retraction() {
        let before = span_key_digest(1, 100, None, 100);
        // Retraction only changes system_to, which is not part of the key.
        let after = span_key_digest(1, 100, None, 100);
        assert_eq!(before, after);
    }
}

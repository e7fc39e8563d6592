//! Helpers for the ICD-9/ICD-10 codes used as column names in the PMBB phenotype matrices and as
//! disease node keys in the knowledge graph.
//!
//! The two sources disagree on formatting: the knowledge graph keeps the period (`A01.1`) while
//! some extracts drop it (`A011`). Codes are compared in their cleaned (period-free) form.

/// The default prefix of codes left out of the analysis (congenital malformations, ICD-10
/// chapter XVII).
pub const DEFAULT_EXCLUDE_PREFIX: &str = "Q";

/// Remove periods from a code, e.g. `A01.1` -> `A011`.
pub fn clean_code(code: &str) -> String {
    code.replace('.', "")
}

/// Disease nodes whose key starts with a letter are ICD-10 codes. Other disease nodes are
/// named entities from the source graph.
pub fn is_icd10_key(key: &str) -> bool {
    matches!(key.chars().next(), Some(ch) if ch.is_ascii_alphabetic())
}

/// Whether the code should be left out given an exclusion prefix. An empty prefix excludes
/// nothing.
pub fn is_excluded(code: &str, exclude_prefix: &str) -> bool {
    !exclude_prefix.is_empty() && code.starts_with(exclude_prefix)
}

/// Whether the code looks like an ICD-9 code (has a period, starts with a digit and the part
/// before the period is below 10).
fn is_icd9(code: &str) -> bool {
    if !code.contains('.') || !matches!(code.chars().next(), Some(ch) if ch.is_ascii_digit()) {
        return false;
    }
    let prefix = code.split('.').next().unwrap_or("");
    matches!(prefix.parse::<u32>(), Ok(v) if v < 10)
}

/// Sort codes with the ICD-9 style codes first, followed by everything else. Both groups are
/// sorted lexicographically.
pub fn sort_icd_codes<S: AsRef<str>>(codes: impl IntoIterator<Item = S>) -> Vec<S> {
    let (mut icd9, mut rest): (Vec<S>, Vec<S>) =
        codes.into_iter().partition(|code| is_icd9(code.as_ref()));
    icd9.sort_by(|a, b| a.as_ref().cmp(b.as_ref()));
    rest.sort_by(|a, b| a.as_ref().cmp(b.as_ref()));
    icd9.extend(rest);
    icd9
}

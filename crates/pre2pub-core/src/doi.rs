use once_cell::sync::Lazy;
use regex::Regex;

/// Normalize user-supplied DOI input to the bare `10.xxxx/...` form.
///
/// Accepts bare DOIs, `doi:` prefixes and `doi.org` URLs. Returns `None`
/// when no DOI can be recognized.
pub fn normalize_doi(input: &str) -> Option<String> {
    static DOI_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)^(?:https?://(?:dx\.)?doi\.org/|doi:\s*)?(10\.\d{4,}/\S+)$").unwrap()
    });

    let caps = DOI_RE.captures(input.trim())?;
    let doi = caps[1].trim_end_matches(['.', ',', ';']);
    Some(doi.to_string())
}

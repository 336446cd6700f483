//! Author-name canonicalization and author-list comparison.
//!
//! Every raw name, whatever its source format, is reduced to a
//! [`CanonicalAuthor`] (last name plus ordered first-name initials). Lists of
//! canonical authors are then compared pairwise with a Levenshtein ratio and a
//! fixed, ordered set of [`AuthorRule`]s.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

use crate::matching::{ascii_fold, levenshtein_ratio};

/// Two canonical names match when their Levenshtein ratio is strictly above this.
pub const AUTHOR_MATCH_THRESHOLD: f64 = 0.9;

/// Common surname prefixes (case-insensitive).
static SURNAME_PREFIXES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "van", "von", "de", "del", "della", "der", "den", "di", "da", "dos", "du", "al", "el",
        "la", "le", "ben", "ibn", "mac", "mc", "o",
    ]
    .into_iter()
    .collect()
});

/// Short surnames often written in capitals after the given name ("Wei LI"),
/// where they would otherwise read as an initials cluster.
static SHORT_SURNAMES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "li", "wu", "xu", "ma", "hu", "lu", "yu", "xi", "qi", "du", "gu", "su", "ng", "ko", "liu", "luo", "guo", "sun", "zhu", "xie", "tan", "lin", "kim", "lee",
        "gao", "cao", "han", "pan", "fan", "cai", "jin", "wei", "qin",
    ]
    .into_iter()
    .collect()
});

/// Name suffixes to strip.
static NAME_SUFFIXES: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["jr", "sr", "ii", "iii", "iv"].into_iter().collect());

/// An author reduced to last name and first-name initials, all lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct CanonicalAuthor {
    last_name: String,
    initials: Vec<char>,
}

impl CanonicalAuthor {
    pub fn new(last_name: impl Into<String>, initials: impl IntoIterator<Item = char>) -> Self {
        Self {
            last_name: last_name.into().to_lowercase(),
            initials: initials
                .into_iter()
                .flat_map(|c| c.to_lowercase())
                .collect(),
        }
    }

    pub fn last_name(&self) -> &str {
        &self.last_name
    }

    pub fn initials(&self) -> &[char] {
        &self.initials
    }

    /// Empty names come from blank input and never match anything.
    pub fn is_empty(&self) -> bool {
        self.last_name.is_empty()
    }
}

/// Renders as `"smith j a"`; this string is what the comparator measures.
impl fmt::Display for CanonicalAuthor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.last_name)?;
        for initial in &self.initials {
            write!(f, " {}", initial)?;
        }
        Ok(())
    }
}

/// Canonicalize a raw author name.
///
/// Handles "Last, First Middle", "First Middle Last", PubMed-style
/// "Last FM" and canonical "last f m" input. Never fails: unparseable
/// input degrades to a best-effort form, blank input to an empty author.
pub fn canonicalize(raw: &str) -> CanonicalAuthor {
    let cleaned = clean_name(raw);

    if let Some((surname, given)) = cleaned.split_once(',') {
        let mut surname_parts: Vec<&str> = surname.split_whitespace().collect();
        if !surname_parts.is_empty() {
            // "Smith A, John": single letters after the surname are initials
            let run_start = trailing_initials_start(&surname_parts);
            let mut initials = initials_of(&surname_parts[run_start..]);
            surname_parts.truncate(run_start);

            let given_parts: Vec<&str> = given
                .split(|c: char| c.is_whitespace() || c == ',')
                .filter(|p| !p.is_empty() && !is_suffix(p))
                .collect();
            initials.extend(initials_of(&given_parts));
            return CanonicalAuthor::new(surname_parts.join(" "), initials);
        }
    }

    let mut parts: Vec<&str> = cleaned
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|p| !p.is_empty())
        .collect();
    while parts.len() >= 2 && parts.last().is_some_and(|p| is_suffix(p)) {
        parts.pop();
    }

    match parts.len() {
        0 => CanonicalAuthor::default(),
        1 => CanonicalAuthor::new(parts[0], []),
        _ => {
            // "Smith JA", "Smith J A", "smith j a": trailing initials
            let run_start = trailing_initials_start(&parts);
            if run_start < parts.len() {
                let surname = parts[..run_start].join(" ");
                return CanonicalAuthor::new(surname, initials_of(&parts[run_start..]));
            }

            // "John A Smith", "Jay Van Bavel"
            let surname_len = surname_len(&parts);
            let split = parts.len() - surname_len;
            CanonicalAuthor::new(parts[split..].join(" "), initials_of(&parts[..split]))
        }
    }
}

/// ASCII-fold, turn periods into separators and drop stray punctuation.
fn clean_name(raw: &str) -> String {
    ascii_fold(raw)
        .chars()
        .map(|c| match c {
            '.' => ' ',
            c if c.is_alphanumeric() || c.is_whitespace() || matches!(c, '-' | '\'' | ',') => c,
            _ => ' ',
        })
        .collect()
}

fn is_suffix(part: &str) -> bool {
    NAME_SUFFIXES.contains(part.to_lowercase().as_str())
}

/// A run of 2-3 capitals written in place of initials, e.g. "JA".
fn is_initial_cluster(part: &str) -> bool {
    (2..=3).contains(&part.len()) && part.chars().all(|c| c.is_ascii_uppercase())
}

/// A capitalized surname from [`SHORT_SURNAMES`] following a mixed-case
/// given name, as in "Wei LI".
fn is_capitalized_short_surname(parts: &[&str]) -> bool {
    let (last, given) = match parts.split_last() {
        Some((last, given)) if !given.is_empty() => (*last, given),
        _ => return false,
    };
    let given_mixed_case = given.iter().all(|p| {
        p.chars().any(|c| c.is_ascii_lowercase()) && p.chars().any(|c| c.is_ascii_uppercase())
    });
    given_mixed_case && SHORT_SURNAMES.contains(last.to_lowercase().as_str())
}

/// Index where the trailing run of initial tokens begins (`parts.len()` if
/// there is none). At least one leading token is always left as the surname.
fn trailing_initials_start(parts: &[&str]) -> usize {
    let mut start = parts.len();
    while start > 1 && parts[start - 1].chars().count() == 1 {
        start -= 1;
    }
    if start == parts.len() && !is_capitalized_short_surname(parts) {
        let last = parts[parts.len() - 1];
        let surname_all_caps = parts[..parts.len() - 1]
            .iter()
            .all(|p| p.chars().all(|c| !c.is_ascii_lowercase()));
        if is_initial_cluster(last) && !surname_all_caps {
            start -= 1;
        }
    }
    start
}

/// Number of trailing parts forming the surname (handles "De La Cruz").
fn surname_len(parts: &[&str]) -> usize {
    let is_prefix = |p: &str| SURNAME_PREFIXES.contains(p.to_lowercase().as_str());

    // Never swallow the first token: it carries the first initial.
    let mut len = 1;
    while len < parts.len() - 1 && is_prefix(parts[parts.len() - len - 1]) {
        len += 1;
    }
    len
}

fn initials_of(given: &[&str]) -> Vec<char> {
    let mut initials = Vec::new();
    for part in given {
        if is_initial_cluster(part) {
            initials.extend(part.chars());
        } else if let Some(c) = part.chars().find(|c| c.is_alphanumeric()) {
            initials.push(c);
        }
    }
    initials
}

/// Whether two canonical authors denote the same person.
pub fn is_same_author(a: &CanonicalAuthor, b: &CanonicalAuthor) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    levenshtein_ratio(&a.to_string(), &b.to_string()) > AUTHOR_MATCH_THRESHOLD
}

/// Independent predicates that can each establish same authorship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorRule {
    /// Equal-length lists, every position matched.
    Positional,
    /// More matched than unmatched positions over the shared length.
    Consensus,
    /// Both lists have three or more authors and the first three positions match.
    FirstThree,
    /// First matches first and last matches last.
    Endpoints,
    /// The preprint's first and last authors both appear somewhere in the candidate list.
    EndpointsAnywhere,
}

impl AuthorRule {
    /// Evaluation order. The first rule that holds decides.
    pub const ORDER: [AuthorRule; 5] = [
        AuthorRule::Positional,
        AuthorRule::Consensus,
        AuthorRule::FirstThree,
        AuthorRule::Endpoints,
        AuthorRule::EndpointsAnywhere,
    ];

    /// `pairs[i]` holds whether position `i` matched in both lists.
    fn holds(self, preprint: &[CanonicalAuthor], candidate: &[CanonicalAuthor], pairs: &[bool]) -> bool {
        match self {
            AuthorRule::Positional => {
                preprint.len() == candidate.len() && pairs.iter().all(|&m| m)
            }
            AuthorRule::Consensus => {
                let matched = pairs.iter().filter(|&&m| m).count();
                matched > pairs.len() - matched
            }
            AuthorRule::FirstThree => {
                preprint.len() >= 3 && candidate.len() >= 3 && pairs[..3].iter().all(|&m| m)
            }
            AuthorRule::Endpoints => {
                preprint.len() >= 2
                    && candidate.len() >= 2
                    && pairs[0]
                    && is_same_author(&preprint[preprint.len() - 1], &candidate[candidate.len() - 1])
            }
            AuthorRule::EndpointsAnywhere => {
                let present = |a: &CanonicalAuthor| candidate.iter().any(|c| is_same_author(a, c));
                present(&preprint[0]) && present(&preprint[preprint.len() - 1])
            }
        }
    }
}

/// Compare two canonical author lists; returns the rule that established
/// same authorship, or `None`.
pub fn compare_author_lists(
    preprint: &[CanonicalAuthor],
    candidate: &[CanonicalAuthor],
) -> Option<AuthorRule> {
    if preprint.is_empty() || candidate.is_empty() {
        return None;
    }

    let pairs: Vec<bool> = preprint
        .iter()
        .zip(candidate)
        .map(|(a, b)| is_same_author(a, b))
        .collect();

    AuthorRule::ORDER
        .into_iter()
        .find(|rule| rule.holds(preprint, candidate, &pairs))
}

/// Hard boolean gate: do the two lists describe the same authorship?
pub fn same_authorship(preprint: &[CanonicalAuthor], candidate: &[CanonicalAuthor]) -> bool {
    compare_author_lists(preprint, candidate).is_some()
}

/// Canonicalize every name of a raw author list, keeping positions.
pub fn canonicalize_all(raw: &[String]) -> Vec<CanonicalAuthor> {
    raw.iter().map(|a| canonicalize(a)).collect()
}

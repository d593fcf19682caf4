//! Extraction of cross-issue dependency declarations from free text.
//!
//! A declaration is a clause introduced by one of the phrases "depends on",
//! "blocked by", "requires" or "after", running until the next sentence
//! terminator or line break. Every issue reference inside the clause counts:
//! `owner/repo#12`, a bare `#12` (resolved against the default repository) or
//! a full `https://github.com/owner/repo/issues/12` URL.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::tracker::DependencyRef;

static CLAUSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:depends\s+on|blocked\s+by|requires|after)\b").expect("valid clause regex")
});

// A period only ends a clause when followed by whitespace or end of text, so
// `github.com` inside a URL does not cut the clause short.
static TERMINATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\r\n;!?]|\.(?:\s|$)").expect("valid terminator regex"));

static REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)https?://github\.com/([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+)/(?:issues|pull)/(\d+)",
        r"|([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+)#(\d+)",
        r"|#(\d+)",
    ))
    .expect("valid reference regex")
});

/// Parses the dependency references declared in `text`.
///
/// Results are de-duplicated case-insensitively by `owner/repo#number`,
/// keeping the first occurrence. Text without a declaration clause yields an
/// empty list.
pub fn parse_dependencies(text: &str, default_owner: &str, default_repo: &str) -> Vec<DependencyRef> {
    let mut seen = HashSet::new();
    let mut refs = Vec::new();

    if text.trim().is_empty() {
        return refs;
    }

    for clause_start in CLAUSE_RE.find_iter(text) {
        let rest = &text[clause_start.end()..];
        let clause = match TERMINATOR_RE.find(rest) {
            Some(end) => &rest[..end.start()],
            None => rest,
        };

        for caps in REFERENCE_RE.captures_iter(clause) {
            let parsed = if let (Some(owner), Some(repo), Some(num)) = (caps.get(1), caps.get(2), caps.get(3)) {
                num.as_str()
                    .parse::<u64>()
                    .ok()
                    .map(|n| DependencyRef::new(owner.as_str(), repo.as_str(), n))
            } else if let (Some(owner), Some(repo), Some(num)) = (caps.get(4), caps.get(5), caps.get(6)) {
                num.as_str()
                    .parse::<u64>()
                    .ok()
                    .map(|n| DependencyRef::new(owner.as_str(), repo.as_str(), n))
            } else {
                caps.get(7)
                    .and_then(|num| num.as_str().parse::<u64>().ok())
                    .map(|n| DependencyRef::new(default_owner, default_repo, n))
            };

            if let Some(dep) = parsed
                && seen.insert(dep.key())
            {
                refs.push(dep);
            }
        }
    }

    refs
}

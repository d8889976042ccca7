//! Completion candidates, ranking, and the insertion decision.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CandidateFlags: u8 {
        /// Do not append the trailing separator after insertion.
        const NO_SPACE = 1 << 0;
        /// Substitute the whole token rather than extend it.
        const REPLACE_TOKEN = 1 << 1;
        /// The candidate repeats an argument already on the command line.
        const DUPLICATES_ARG = 1 << 2;
        /// Matched as a fuzzy subsequence, not a prefix.
        const FUZZY_MATCH = 1 << 3;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Full replacement text for the current token.
    pub replacement: String,
    pub description: String,
    pub flags: CandidateFlags,
}

impl Candidate {
    pub fn new(replacement: impl Into<String>, description: impl Into<String>) -> Candidate {
        Candidate {
            replacement: replacement.into(),
            description: description.into(),
            flags: CandidateFlags::empty(),
        }
    }

    pub fn with_flags(mut self, flags: CandidateFlags) -> Candidate {
        self.flags |= flags;
        self
    }
}

/// How well a candidate matches the token, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchTier {
    Prefix,
    CasePrefix,
    Fuzzy,
}

/// Classify a candidate against the token prefix; `None` means no match at
/// all.
pub fn match_tier(candidate: &str, token: &str) -> Option<MatchTier> {
    if token.is_empty() || candidate.starts_with(token) {
        return Some(MatchTier::Prefix);
    }
    if candidate.to_lowercase().starts_with(&token.to_lowercase()) {
        return Some(MatchTier::CasePrefix);
    }
    if is_subsequence(&token.to_lowercase(), &candidate.to_lowercase()) {
        return Some(MatchTier::Fuzzy);
    }
    None
}

fn is_subsequence(needle: &str, haystack: &str) -> bool {
    let mut chars = haystack.chars();
    needle.chars().all(|n| chars.any(|h| h == n))
}

/// Ranking tier of one candidate. Token-replacing candidates (wildcard
/// expansions) already matched by construction and rank with the prefix
/// tier.
fn tier_of(candidate: &Candidate, token: &str) -> Option<MatchTier> {
    if candidate.flags.contains(CandidateFlags::REPLACE_TOKEN) {
        return Some(MatchTier::Prefix);
    }
    match_tier(&candidate.replacement, token)
}

/// Sort by (tier, length, lexicographic) and collapse equal replacements,
/// concatenating their descriptions.
pub fn rank_and_dedup(mut candidates: Vec<Candidate>, token: &str) -> Vec<Candidate> {
    candidates.retain(|c| tier_of(c, token).is_some());
    candidates.sort_by(|a, b| {
        let ta = tier_of(a, token).unwrap();
        let tb = tier_of(b, token).unwrap();
        ta.cmp(&tb)
            .then(a.replacement.len().cmp(&b.replacement.len()))
            .then(a.replacement.cmp(&b.replacement))
    });
    let mut out: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for mut cand in candidates {
        if tier_of(&cand, token) == Some(MatchTier::Fuzzy) {
            cand.flags |= CandidateFlags::FUZZY_MATCH;
        }
        match out.last_mut() {
            Some(prev) if prev.replacement == cand.replacement => {
                if !cand.description.is_empty() && prev.description != cand.description {
                    if !prev.description.is_empty() {
                        prev.description.push_str("; ");
                    }
                    prev.description.push_str(&cand.description);
                }
                prev.flags |= cand.flags;
            }
            _ => out.push(cand),
        }
    }
    out
}

/// What tab should do with a ranked candidate list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insertion {
    /// Replace the token with `text`, optionally appending a separator.
    Single { text: String, append_space: bool },
    /// Insert the shared prefix, no separator, keep completing.
    CommonPrefix(String),
    /// Too ambiguous: hand the list to the pager.
    ShowPager,
}

fn common_prefix(a: &str, b: &str) -> usize {
    a.chars()
        .zip(b.chars())
        .take_while(|(x, y)| x == y)
        .count()
}

/// Decide the insertion for a ranked list. `None` when the list is empty.
pub fn insertion_for(candidates: &[Candidate], token: &str) -> Option<Insertion> {
    let first = candidates.first()?;
    if candidates.len() == 1 {
        return Some(Insertion::Single {
            text: first.replacement.clone(),
            append_space: !first.flags.contains(CandidateFlags::NO_SPACE),
        });
    }
    let mut prefix_len = first.replacement.chars().count();
    for cand in &candidates[1..] {
        prefix_len = prefix_len.min(common_prefix(&first.replacement, &cand.replacement));
    }
    let shared: String = first.replacement.chars().take(prefix_len).collect();
    if shared.chars().count() > token.chars().count() && shared.starts_with(token) {
        Some(Insertion::CommonPrefix(shared))
    } else {
        Some(Insertion::ShowPager)
    }
}

//! Deterministic quality ranking shared by direct-file candidates and
//! manifest variants.
//!
//! A candidate's rank is its declared quality signal (a bandwidth, a numeric
//! quality field) when *every* candidate in the set declares one. Otherwise the
//! rank is the position in the declared list, later entries ranking higher:
//! portals list renditions from low to high, so the last entry wins. Ties are
//! broken by descending URL order. No randomness is involved, so identical
//! inputs always produce the identical order.

use std::cmp::Reverse;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub url: String,
    pub declared: Option<u64>,
}

impl Candidate {
    pub fn positional(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            declared: None,
        }
    }

    pub fn declared(url: impl Into<String>, quality: u64) -> Self {
        Self {
            url: url.into(),
            declared: Some(quality),
        }
    }
}

/// Orders candidates best-first.
pub fn rank_order(candidates: Vec<Candidate>) -> Vec<String> {
    let all_declared = !candidates.is_empty() && candidates.iter().all(|c| c.declared.is_some());

    let mut ranked: Vec<(u64, String)> = candidates
        .into_iter()
        .enumerate()
        .map(|(position, c)| {
            let rank = match c.declared {
                Some(q) if all_declared => q,
                _ => position as u64,
            };
            (rank, c.url)
        })
        .collect();

    ranked.sort_by(|a, b| (Reverse(a.0), Reverse(&a.1)).cmp(&(Reverse(b.0), Reverse(&b.1))));
    ranked.into_iter().map(|(_, url)| url).collect()
}

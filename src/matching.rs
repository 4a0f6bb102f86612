//! Player name reconciliation.
//!
//! Maps free-text names (spreadsheet cells, API records) onto canonical
//! player identities. Every importer goes through [`Reconciler`] so the
//! normalization rule and the distance threshold live in one place.

use std::collections::{BTreeSet, HashMap};

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::config::MATCH_MAX_DISTANCE;
use crate::types::Player;

/// Lowercase, strip diacritics, drop non-alphanumeric characters and collapse whitespace.
/// Idempotent: `normalize_name(&normalize_name(s)) == normalize_name(s)`.
pub fn normalize_name(name: &str) -> String {
    let folded: String = name
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Levenshtein distance counted in chars (unit insert, delete, substitute).
pub fn edit_distance(a: &str, b: &str) -> usize {
    strsim::levenshtein(a, b)
}

/// True when either normalized name contains the other.
pub fn contains_either(a: &str, b: &str) -> bool {
    let (a, b) = (normalize_name(a), normalize_name(b));
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(&b) || b.contains(&a)
}

/// Number of distinct whitespace-delimited tokens the normalized names share.
pub fn shared_tokens(a: &str, b: &str) -> usize {
    let a = normalize_name(a);
    let b = normalize_name(b);
    let left: BTreeSet<&str> = a.split_whitespace().collect();
    let right: BTreeSet<&str> = b.split_whitespace().collect();
    left.intersection(&right).count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchPolicy {
    /// Accept a fuzzy match only when the distance is strictly below this.
    pub max_distance: usize,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self { max_distance: MATCH_MAX_DISTANCE }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameMatch {
    /// Index into the canonical list.
    pub index: usize,
    pub distance: usize,
}

/// Best canonical name for `candidate` by edit distance over normalized forms.
/// Exact normalized equality short-circuits with distance 0; ties keep the earliest candidate.
pub fn best_match<S: AsRef<str>>(
    candidate: &str,
    canonicals: &[S],
    policy: MatchPolicy,
) -> Option<NameMatch> {
    let normalized: Vec<String> = canonicals.iter().map(|c| normalize_name(c.as_ref())).collect();
    best_normalized(&normalize_name(candidate), normalized.iter().map(String::as_str), policy)
}

fn best_normalized<'a>(
    candidate: &str,
    canonicals: impl Iterator<Item = &'a str>,
    policy: MatchPolicy,
) -> Option<NameMatch> {
    let mut best: Option<NameMatch> = None;
    for (index, canonical) in canonicals.enumerate() {
        if canonical == candidate {
            return Some(NameMatch { index, distance: 0 });
        }
        let distance = edit_distance(candidate, canonical);
        if best.map_or(true, |b| distance < b.distance) {
            best = Some(NameMatch { index, distance });
        }
    }
    best.filter(|b| b.distance < policy.max_distance)
}

/// Looser matcher used when edit distance is not: containment first, then a shared
/// token when the candidate has at most three tokens. Returns the first hit.
pub fn loose_match<S: AsRef<str>>(candidate: &str, canonicals: &[S]) -> Option<usize> {
    let candidate = normalize_name(candidate);
    if candidate.is_empty() {
        return None;
    }
    let token_count = candidate.split_whitespace().count();
    canonicals.iter().position(|c| {
        let c = c.as_ref();
        contains_either(&candidate, c) || (token_count <= 3 && shared_tokens(&candidate, c) >= 1)
    })
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchStrategy {
    /// Exact normalized lookup, then bounded edit distance.
    #[default]
    EditDistance,
    /// Exact normalized lookup, then containment / shared-token matching.
    Loose,
}

impl std::str::FromStr for MatchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "edit" | "edit-distance" | "edit_distance" => Ok(MatchStrategy::EditDistance),
            "loose" => Ok(MatchStrategy::Loose),
            other => Err(format!("unknown match strategy {other:?} (expected edit-distance or loose)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Exact(i64),
    Fuzzy { player_id: i64, distance: usize },
    Loose(i64),
    Unmatched,
}

impl Resolution {
    pub fn player_id(&self) -> Option<i64> {
        match *self {
            Resolution::Exact(id) | Resolution::Loose(id) => Some(id),
            Resolution::Fuzzy { player_id, .. } => Some(player_id),
            Resolution::Unmatched => None,
        }
    }
}

/// Canonical name index built once from the player table.
pub struct Reconciler {
    ids: Vec<i64>,
    normalized: Vec<String>,
    exact: HashMap<String, i64>,
    strategy: MatchStrategy,
    policy: MatchPolicy,
}

impl Reconciler {
    pub fn new(players: &[Player], strategy: MatchStrategy, policy: MatchPolicy) -> Self {
        let mut ids = Vec::with_capacity(players.len());
        let mut normalized = Vec::with_capacity(players.len());
        let mut exact = HashMap::with_capacity(players.len());
        for player in players {
            let key = normalize_name(&player.display_name);
            if key.is_empty() {
                continue;
            }
            exact.entry(key.clone()).or_insert(player.id);
            ids.push(player.id);
            normalized.push(key);
        }
        Self { ids, normalized, exact, strategy, policy }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn resolve(&self, name: &str) -> Resolution {
        let key = normalize_name(name);
        if key.is_empty() {
            return Resolution::Unmatched;
        }
        if let Some(&id) = self.exact.get(&key) {
            return Resolution::Exact(id);
        }
        match self.strategy {
            MatchStrategy::EditDistance => {
                match best_normalized(&key, self.normalized.iter().map(String::as_str), self.policy) {
                    Some(m) => Resolution::Fuzzy { player_id: self.ids[m.index], distance: m.distance },
                    None => Resolution::Unmatched,
                }
            }
            MatchStrategy::Loose => match loose_match(&key, &self.normalized) {
                Some(index) => Resolution::Loose(self.ids[index]),
                None => Resolution::Unmatched,
            },
        }
    }
}

/// Outcome of reconciling a batch of names, for the "manual mapping" report.
#[derive(Debug, Default, Clone)]
pub struct ReconcileReport {
    pub exact: BTreeSet<String>,
    /// (input name, player id, distance) for fuzzy or loose hits; reviewed before trusting.
    pub approximate: Vec<(String, i64, usize)>,
    pub unmatched: BTreeSet<String>,
}

impl ReconcileReport {
    pub fn record(&mut self, name: &str, resolution: Resolution) {
        match resolution {
            Resolution::Exact(_) => {
                self.exact.insert(name.to_string());
            }
            Resolution::Fuzzy { player_id, distance } => {
                if !self.approximate.iter().any(|(n, _, _)| n == name) {
                    self.approximate.push((name.to_string(), player_id, distance));
                }
            }
            Resolution::Loose(player_id) => {
                if !self.approximate.iter().any(|(n, _, _)| n == name) {
                    self.approximate.push((name.to_string(), player_id, 0));
                }
            }
            Resolution::Unmatched => {
                self.unmatched.insert(name.to_string());
            }
        }
    }

    pub fn matched_count(&self) -> usize {
        self.exact.len() + self.approximate.len()
    }
}

// ---------------------------------------------------------------------------
// Display-name corrections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub player_id: i64,
    pub from: String,
    pub to: String,
    /// Edit distance of the name match; `None` when matched by id.
    pub distance: Option<usize>,
}

/// Corrections that bring stored display names in line with `canonical`.
/// A canonical record with the same id wins; otherwise the stored name is
/// reconciled against canonical names under `policy`. Returns the renames
/// and the stored players that matched nothing.
pub fn plan_renames(stored: &[Player], canonical: &[Player], policy: MatchPolicy) -> (Vec<Rename>, Vec<Player>) {
    let by_id: HashMap<i64, &str> = canonical.iter().map(|p| (p.id, p.display_name.as_str())).collect();
    let reconciler = Reconciler::new(canonical, MatchStrategy::EditDistance, policy);

    let mut renames = Vec::new();
    let mut unmatched = Vec::new();
    for player in stored {
        let (target, distance) = match by_id.get(&player.id) {
            Some(name) => (*name, None),
            None => match reconciler.resolve(&player.display_name) {
                Resolution::Exact(id) => (by_id.get(&id).copied().unwrap_or_default(), Some(0)),
                Resolution::Fuzzy { player_id, distance } => {
                    (by_id.get(&player_id).copied().unwrap_or_default(), Some(distance))
                }
                Resolution::Loose(_) | Resolution::Unmatched => {
                    unmatched.push(player.clone());
                    continue;
                }
            },
        };
        if !target.is_empty() && target != player.display_name {
            renames.push(Rename {
                player_id: player.id,
                from: player.display_name.clone(),
                to: target.to_string(),
                distance,
            });
        }
    }
    (renames, unmatched)
}

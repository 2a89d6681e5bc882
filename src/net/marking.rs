use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Token counts per place. The whole observable state of a net.
///
/// Ordered so that markings hash, compare, and print deterministically,
/// which the reachability search relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Marking(BTreeMap<String, u32>);

impl Marking {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tokens at `place`; places absent from the map hold zero.
    pub fn tokens(&self, place: &str) -> u32 {
        self.0.get(place).copied().unwrap_or(0)
    }

    /// Overwrite the count at `place`.
    pub fn set(&mut self, place: impl Into<String>, tokens: u32) {
        self.0.insert(place.into(), tokens);
    }

    pub fn add(&mut self, place: &str, tokens: u32) {
        *self.0.entry(place.to_string()).or_insert(0) += tokens;
    }

    /// Removes `tokens` from `place`, refusing to go below zero.
    pub(crate) fn take(&mut self, place: &str, tokens: u32) -> bool {
        match self.0.get_mut(place) {
            Some(count) if *count >= tokens => {
                *count -= tokens;
                true
            }
            _ => tokens == 0,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.0.iter().map(|(p, n)| (p.as_str(), *n))
    }

    /// Weighted sum `Σ w[p]·m[p]`; places without a weight count zero.
    pub fn weighted_sum(&self, weights: &BTreeMap<String, i64>) -> i64 {
        weights
            .iter()
            .map(|(place, w)| w * i64::from(self.tokens(place)))
            .sum()
    }
}

impl<K: Into<String>> FromIterator<(K, u32)> for Marking {
    fn from_iter<I: IntoIterator<Item = (K, u32)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl fmt::Display for Marking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (place, tokens)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{place}: {tokens}")?;
        }
        write!(f, "}}")
    }
}

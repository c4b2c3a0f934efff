//! Version-bucket table mapping browser releases onto canonical profiles.
//!
//! Bucket boundaries are empirical, so the table is plain data: the built-in
//! default can be replaced by a JSON document without touching code.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{CanonicalProfile, LiteralProfile, TlsFingerprintProfile};

/// An inclusive version range of one browser family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketRule {
    pub browser: String,
    pub min_version: u32,
    /// `None` means open-ended.
    #[serde(default)]
    pub max_version: Option<u32>,
    pub profile: CanonicalProfile,
}

impl BucketRule {
    fn new(browser: &str, min: u32, max: Option<u32>, profile: CanonicalProfile) -> Self {
        Self {
            browser: browser.to_string(),
            min_version: min,
            max_version: max,
            profile,
        }
    }

    fn matches(&self, browser: &str, version: u32) -> bool {
        self.browser == browser
            && version >= self.min_version
            && self.max_version.map_or(true, |max| version <= max)
    }
}

/// Where a resolved profile comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileSource {
    Canonical(CanonicalProfile),
    Literal(LiteralProfile),
}

impl ProfileSource {
    pub fn build(&self) -> TlsFingerprintProfile {
        match self {
            Self::Canonical(profile) => profile.build(),
            Self::Literal(profile) => profile.build(),
        }
    }
}

/// Lookup table from profile ids to profile sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketTable {
    pub rules: Vec<BucketRule>,
    /// Exact ids that map to hand-authored specs.
    #[serde(default)]
    pub literals: BTreeMap<String, LiteralProfile>,
    /// Browser family aliases, e.g. `edge` -> `chrome`.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    pub default_profile: CanonicalProfile,
}

impl Default for BucketTable {
    fn default() -> Self {
        use CanonicalProfile::*;

        let rules = vec![
            BucketRule::new("chrome", 0, Some(86), Chrome83),
            BucketRule::new("chrome", 87, Some(105), Chrome87),
            BucketRule::new("chrome", 106, Some(123), Chrome106),
            BucketRule::new("chrome", 124, None, Chrome124),
            BucketRule::new("firefox", 0, Some(77), Firefox65),
            BucketRule::new("firefox", 78, None, Firefox78),
            BucketRule::new("safari", 14, None, Safari16),
        ];

        let mut literals = BTreeMap::new();
        for literal in LiteralProfile::ALL {
            literals.insert(literal.as_str().to_string(), literal);
        }

        let aliases = ["edge", "msedge", "chromium"]
            .into_iter()
            .map(|alias| (alias.to_string(), "chrome".to_string()))
            .collect();

        Self {
            rules,
            literals,
            aliases,
            default_profile: CanonicalProfile::LATEST,
        }
    }
}

impl BucketTable {
    /// Parses a table from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Looks up a profile id.
    ///
    /// Literal ids are matched ignoring case and `-`/`_` separators, so
    /// `safari-13`, `Safari13` and `safari_13` are the same id. Otherwise the
    /// id is split into a browser family and a leading major version
    /// (`chrome-96`, `Chrome96`, `chrome_96.0.4664`) and bucketed.
    pub fn lookup(&self, id: &str) -> Option<ProfileSource> {
        let id = id.trim();
        if id.is_empty() {
            return None;
        }

        let compact = compact_id(id);
        if let Some(literal) = self
            .literals
            .iter()
            .find(|(key, _)| compact_id(key) == compact)
            .map(|(_, literal)| *literal)
        {
            return Some(ProfileSource::Literal(literal));
        }

        let (browser, version) = split_id(id)?;
        let browser = self
            .aliases
            .get(&browser)
            .cloned()
            .unwrap_or(browser);

        self.rules
            .iter()
            .find(|rule| rule.matches(&browser, version))
            .map(|rule| ProfileSource::Canonical(rule.profile))
    }
}

fn compact_id(id: &str) -> String {
    id.chars()
        .filter(|c| *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Splits `chrome-96` style ids into (`chrome`, 96).
fn split_id(id: &str) -> Option<(String, u32)> {
    let digits_at = id.find(|c: char| c.is_ascii_digit())?;
    let browser = id[..digits_at]
        .trim_end_matches(['-', '_', ' '])
        .to_ascii_lowercase();
    if browser.is_empty() {
        return None;
    }

    let digits: String = id[digits_at..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let version = digits.parse().ok()?;
    Some((browser, version))
}

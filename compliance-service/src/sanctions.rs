use crate::error::{ComplianceError, Result};
use crate::types::{IdentifierType, SanctionsEntry, SanctionsList};
use dashmap::DashMap;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

/// SanctionsEngine holds the loaded lists and answers name, country and
/// identifier lookups. Lists are replaced wholesale on reload.
pub struct SanctionsEngine {
    // Map: list_name -> (entry_id -> SanctionsEntry)
    lists: Arc<DashMap<String, DashMap<String, SanctionsEntry>>>,
    fuzzy_threshold: f64,
}

impl SanctionsEngine {
    pub fn new(fuzzy_threshold: f64) -> Self {
        Self {
            lists: Arc::new(DashMap::new()),
            fuzzy_threshold,
        }
    }

    /// Replace one list
    pub fn load_list(&self, list: SanctionsList, entries: Vec<SanctionsEntry>) -> Result<()> {
        let list_name = list.as_str().to_string();
        let map = DashMap::new();

        for entry in entries {
            if entry.list != list {
                return Err(ComplianceError::InvalidInput(format!(
                    "entry {} belongs to {}, not {}",
                    entry.id,
                    entry.list.as_str(),
                    list_name
                )));
            }
            map.insert(entry.id.clone(), entry);
        }

        let count = map.len();
        self.lists.insert(list_name.clone(), map);
        info!("Loaded {} sanctions list with {} entries", list_name, count);

        Ok(())
    }

    /// Load a JSON array of entries, grouped into lists by their `list` field.
    /// Returns the number of entries loaded.
    pub fn load_json_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ComplianceError::ListUnreadable(format!("{}: {}", path.display(), e)))?;
        let entries: Vec<SanctionsEntry> = serde_json::from_str(&raw)
            .map_err(|e| ComplianceError::ListUnreadable(format!("{}: {}", path.display(), e)))?;

        let total = entries.len();
        let mut grouped: HashMap<String, (SanctionsList, Vec<SanctionsEntry>)> = HashMap::new();
        for entry in entries {
            grouped
                .entry(entry.list.as_str().to_string())
                .or_insert_with(|| (entry.list.clone(), Vec::new()))
                .1
                .push(entry);
        }

        for (_, (list, entries)) in grouped {
            self.load_list(list, entries)?;
        }
        Ok(total)
    }

    /// Entries whose names or aliases fuzzily match `name`
    pub fn check_name(&self, name: &str) -> Vec<SanctionsEntry> {
        let normalized_name = normalize_name(name);
        if normalized_name.is_empty() {
            return Vec::new();
        }
        let mut matches = Vec::new();

        for list_entry in self.lists.iter() {
            let list_name = list_entry.key();

            for entry_ref in list_entry.value().iter() {
                let entry = entry_ref.value();

                let hit = entry.names.iter().chain(entry.aliases.iter()).find(|candidate| {
                    fuzzy_match(&normalized_name, &normalize_name(candidate), self.fuzzy_threshold)
                });

                if let Some(candidate) = hit {
                    debug!("Sanctions match in {}: {} matches {}", list_name, name, candidate);
                    matches.push(entry.clone());
                }
            }
        }

        matches
    }

    /// Entries listing `country_code` as a sanctioned jurisdiction
    pub fn check_country(&self, country_code: &str) -> Vec<SanctionsEntry> {
        let country_upper = country_code.trim().to_uppercase();

        self.lists
            .iter()
            .flat_map(|list_entry| {
                list_entry
                    .value()
                    .iter()
                    .filter(|entry_ref| {
                        entry_ref
                            .value()
                            .countries
                            .iter()
                            .any(|country| country.to_uppercase() == country_upper)
                    })
                    .map(|entry_ref| entry_ref.value().clone())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Entries carrying `id_value` (document number, IBAN, wallet address...)
    pub fn check_identifier(&self, id_value: &str) -> Vec<SanctionsEntry> {
        if id_value.trim().is_empty() {
            return Vec::new();
        }

        self.lists
            .iter()
            .flat_map(|list_entry| {
                list_entry
                    .value()
                    .iter()
                    .filter(|entry_ref| {
                        entry_ref
                            .value()
                            .identifiers
                            .iter()
                            .any(|identifier| {
                                normalize_identifier(&identifier.id_type, &identifier.value)
                                    == normalize_identifier(&identifier.id_type, id_value)
                            })
                    })
                    .map(|entry_ref| entry_ref.value().clone())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Get total number of entries across all lists
    pub fn total_entries(&self) -> usize {
        self.lists.iter().map(|l| l.value().len()).sum()
    }

    /// Get list of loaded sanctions lists
    pub fn loaded_lists(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lists.iter().map(|l| l.key().clone()).collect();
        names.sort();
        names
    }
}

fn punctuation() -> &'static Regex {
    static PUNCTUATION: OnceLock<Regex> = OnceLock::new();
    PUNCTUATION.get_or_init(|| Regex::new(r"[^\w\s]").expect("static regex"))
}

// Lowercase, strip punctuation, collapse whitespace
fn normalize_name(name: &str) -> String {
    let cleaned = punctuation().replace_all(name, "");
    cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// Compared as the listed identifier's type: EVM hex addresses ignore EIP-55
// casing, base58 and bech32 addresses are exact, documents and IBANs ignore case
fn normalize_identifier(id_type: &IdentifierType, value: &str) -> String {
    let compact = value.replace(char::is_whitespace, "");
    match id_type {
        IdentifierType::WalletAddress if is_hex_address(&compact) => compact.to_lowercase(),
        IdentifierType::WalletAddress => compact,
        _ => compact.to_uppercase(),
    }
}

fn is_hex_address(value: &str) -> bool {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

// Similarity = 1 - distance / longest length, over chars
fn fuzzy_match(s1: &str, s2: &str, threshold: f64) -> bool {
    if s1 == s2 {
        return true;
    }

    let max_len = s1.chars().count().max(s2.chars().count());
    if max_len == 0 {
        return false;
    }

    let distance = levenshtein_distance(s1, s2);
    let similarity = 1.0 - (distance as f64 / max_len as f64);

    similarity >= threshold
}

fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();

    // Single-row dynamic programming
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

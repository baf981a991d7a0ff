//! External co-occurrence statistics

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StatLookupError};

/// How often two entities appear together in a reference corpus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoOccurrenceStat {
    pub count: u64,
    /// Most recent joint appearance
    #[serde(default)]
    pub recency_timestamp: Option<DateTime<Utc>>,
}

/// Source of co-occurrence statistics for a pair of entity names
#[async_trait]
pub trait CoOccurrenceSource: Send + Sync {
    async fn lookup(
        &self,
        entity_a: &str,
        entity_b: &str,
    ) -> std::result::Result<CoOccurrenceStat, StatLookupError>;
}

const CORPORATE_SUFFIXES: &[&str] = &[
    "incorporated",
    "corporation",
    "company",
    "corp.",
    "corp",
    "inc.",
    "inc",
    "ltd.",
    "ltd",
    "llc",
];

/// Name used for statistics lookups: corporate suffixes are stripped
pub fn lookup_name(name: &str) -> String {
    let mut cleaned = name.trim().to_string();
    loop {
        let lower = cleaned.to_lowercase();
        let stripped = CORPORATE_SUFFIXES.iter().find_map(|suffix| {
            let cut = lower.strip_suffix(suffix)?;
            // only whole words, and never the entire name
            let boundary = cut.ends_with(|c: char| c.is_whitespace() || c == ',');
            (boundary && !cut.trim().is_empty()).then_some(cut.len())
        });
        match stripped {
            // lowercasing can change byte lengths outside ASCII
            Some(len) if lower.len() == cleaned.len() && cleaned.is_char_boundary(len) => {
                cleaned = cleaned[..len]
                    .trim_end_matches(|c: char| c.is_whitespace() || c == ',')
                    .to_string();
            }
            _ => return cleaned,
        }
    }
}

fn pair_key(entity_a: &str, entity_b: &str) -> (String, String) {
    let a = lookup_name(entity_a).to_lowercase();
    let b = lookup_name(entity_b).to_lowercase();
    if a <= b { (a, b) } else { (b, a) }
}

/// One row of a co-occurrence table file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoOccurrenceEntry {
    pub a: String,
    pub b: String,
    pub count: u64,
    #[serde(default)]
    pub recency_timestamp: Option<DateTime<Utc>>,
}

/// In-memory statistics, insensitive to pair order, case and corporate suffixes
#[derive(Debug, Clone, Default)]
pub struct CoOccurrenceTable {
    entries: HashMap<(String, String), CoOccurrenceStat>,
}

impl CoOccurrenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity_a: &str, entity_b: &str, stat: CoOccurrenceStat) {
        self.entries.insert(pair_key(entity_a, entity_b), stat);
    }

    pub fn with_entry(mut self, entity_a: &str, entity_b: &str, stat: CoOccurrenceStat) -> Self {
        self.insert(entity_a, entity_b, stat);
        self
    }

    /// Parse `[{"a": .., "b": .., "count": .., "recency_timestamp": ..}]`
    pub fn from_json(json: &str) -> Result<Self> {
        let rows: Vec<CoOccurrenceEntry> = serde_json::from_str(json)?;
        let mut table = Self::new();
        for row in rows {
            table.insert(
                &row.a,
                &row.b,
                CoOccurrenceStat {
                    count: row.count,
                    recency_timestamp: row.recency_timestamp,
                },
            );
        }
        Ok(table)
    }

    pub fn get(&self, entity_a: &str, entity_b: &str) -> Option<CoOccurrenceStat> {
        self.entries.get(&pair_key(entity_a, entity_b)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CoOccurrenceSource for CoOccurrenceTable {
    async fn lookup(
        &self,
        entity_a: &str,
        entity_b: &str,
    ) -> std::result::Result<CoOccurrenceStat, StatLookupError> {
        self.get(entity_a, entity_b)
            .ok_or_else(|| StatLookupError::NotFound(entity_a.to_string(), entity_b.to_string()))
    }
}

/// Source used when no statistics provider is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCoOccurrence;

#[async_trait]
impl CoOccurrenceSource for NoCoOccurrence {
    async fn lookup(
        &self,
        _entity_a: &str,
        _entity_b: &str,
    ) -> std::result::Result<CoOccurrenceStat, StatLookupError> {
        Err(StatLookupError::Unavailable(
            "no co-occurrence source configured".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_name_strips_suffixes() {
        assert_eq!(lookup_name("Apple Inc."), "Apple");
        assert_eq!(lookup_name("Microsoft Corporation"), "Microsoft");
        assert_eq!(lookup_name("Foxconn Technology Co Ltd."), "Foxconn Technology Co");
        assert_eq!(lookup_name("Acme, LLC"), "Acme");
        assert_eq!(lookup_name("The Walt Disney Company"), "The Walt Disney");
        assert_eq!(lookup_name("Incorporated"), "Incorporated");
        assert_eq!(lookup_name("Zinc"), "Zinc");
    }

    #[test]
    fn test_table_is_order_and_suffix_insensitive() {
        let stat = CoOccurrenceStat {
            count: 42,
            recency_timestamp: None,
        };
        let table = CoOccurrenceTable::new().with_entry("Apple Inc.", "TSMC", stat);

        assert_eq!(table.get("tsmc", "apple"), Some(stat));
        assert_eq!(table.get("Apple", "Samsung"), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_table_from_json() {
        let table = CoOccurrenceTable::from_json(
            r#"[
                {"a": "Nvidia", "b": "TSMC", "count": 120, "recency_timestamp": "2024-05-01T00:00:00Z"},
                {"a": "Nvidia", "b": "AMD", "count": 80}
            ]"#,
        )
        .unwrap();

        assert_eq!(table.len(), 2);
        assert!(table.get("TSMC", "Nvidia").unwrap().recency_timestamp.is_some());
        assert!(CoOccurrenceTable::from_json("{}").is_err());
    }

    #[tokio::test]
    async fn test_sources() {
        let table = CoOccurrenceTable::new().with_entry(
            "A",
            "B",
            CoOccurrenceStat {
                count: 1,
                recency_timestamp: None,
            },
        );
        assert!(table.lookup("B", "A").await.is_ok());
        assert!(matches!(
            table.lookup("A", "C").await,
            Err(StatLookupError::NotFound(_, _))
        ));
        assert!(matches!(
            NoCoOccurrence.lookup("A", "B").await,
            Err(StatLookupError::Unavailable(_))
        ));
    }
}

use crate::series::{Collection, Series};
use crate::types::{SourceKind, Timeframe};
use std::collections::{BTreeMap, BTreeSet};

/// Identity of one bar-aligned series group inside a dataset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesKey {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub source: SourceKind,
}

impl SeriesKey {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe, source: SourceKind) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            source,
        }
    }

    pub fn candles(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self::new(symbol, timeframe, SourceKind::Ohlcv)
    }
}

/// Identity of one tick collection inside a dataset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollectionKey {
    pub symbol: String,
    pub source: SourceKind,
}

/// Keyed container of immutable series and tick collections.
///
/// `version_epoch` is bumped on every append and keys the evaluator's
/// batch memoization.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    groups: BTreeMap<SeriesKey, BTreeMap<String, Series>>,
    collections: BTreeMap<CollectionKey, Collection>,
    version_epoch: u64,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version_epoch(&self) -> u64 {
        self.version_epoch
    }

    pub fn insert_series(&mut self, key: SeriesKey, series: Series) {
        debug_assert_eq!(series.source, key.source, "series source must match key");
        self.groups
            .entry(key)
            .or_default()
            .insert(series.field.clone(), series);
        self.version_epoch += 1;
    }

    pub fn insert_collection(&mut self, collection: Collection) {
        let key = CollectionKey {
            symbol: collection.symbol.clone(),
            source: collection.source,
        };
        self.collections.insert(key, collection);
        self.version_epoch += 1;
    }

    pub fn series(&self, key: &SeriesKey, field: &str) -> Option<&Series> {
        self.groups.get(key).and_then(|fields| fields.get(field))
    }

    pub fn collection(&self, symbol: &str, source: SourceKind) -> Option<&Collection> {
        self.collections.get(&CollectionKey {
            symbol: symbol.to_string(),
            source,
        })
    }

    /// View restricted by any subset of the key dimensions.
    pub fn select<'a>(
        &'a self,
        symbol: Option<&'a str>,
        timeframe: Option<Timeframe>,
        source: Option<SourceKind>,
    ) -> impl Iterator<Item = (&'a SeriesKey, &'a BTreeMap<String, Series>)> {
        self.groups.iter().filter(move |(key, _)| {
            symbol.is_none_or(|s| key.symbol == s)
                && timeframe.is_none_or(|tf| key.timeframe == tf)
                && source.is_none_or(|src| key.source == src)
        })
    }

    /// Append one bar to every named field of a series group, producing a
    /// new dataset view. Existing readers keep their snapshot.
    pub fn append_bar(&self, key: &SeriesKey, timestamp: i64, fields: &[(&str, f64)]) -> Self {
        let mut next = self.clone();
        let group = next.groups.entry(key.clone()).or_default();
        for (field, value) in fields {
            let series = match group.get(*field) {
                Some(existing) => existing.append(&[timestamp], &[*value]),
                None => Series::from_values(
                    vec![timestamp],
                    vec![*value],
                    key.symbol.clone(),
                    key.timeframe,
                    key.source,
                    *field,
                ),
            };
            group.insert((*field).to_string(), series);
        }
        next.version_epoch += 1;
        next
    }

    pub fn schema(&self) -> DatasetSchema {
        let mut series = BTreeMap::new();
        for (key, fields) in &self.groups {
            for (field, s) in fields {
                series.insert(
                    SchemaEntry {
                        symbol: key.symbol.clone(),
                        timeframe: key.timeframe,
                        source: key.source,
                        field: field.clone(),
                    },
                    s.len(),
                );
            }
        }
        let mut collections = BTreeMap::new();
        for (key, collection) in &self.collections {
            collections.insert(
                key.clone(),
                collection.field_names().map(str::to_string).collect(),
            );
        }
        DatasetSchema {
            series,
            collections,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaEntry {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub source: SourceKind,
    pub field: String,
}

/// Which `(symbol, timeframe, source, field)` series exist and how long they
/// are. Planning needs only this, not the data itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetSchema {
    pub series: BTreeMap<SchemaEntry, usize>,
    pub collections: BTreeMap<CollectionKey, BTreeSet<String>>,
}

impl DatasetSchema {
    pub fn bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        source: SourceKind,
        field: &str,
    ) -> Option<usize> {
        self.series
            .get(&SchemaEntry {
                symbol: symbol.to_string(),
                timeframe,
                source,
                field: field.to_string(),
            })
            .copied()
    }

    /// Symbols present in the candle portion of the schema, in stable order.
    pub fn symbols(&self) -> BTreeSet<&str> {
        self.series
            .keys()
            .map(|entry| entry.symbol.as_str())
            .collect()
    }

    /// The single symbol of the schema, if unambiguous. Used to resolve
    /// `SourceRef`s that omit the symbol.
    pub fn sole_symbol(&self) -> Option<&str> {
        let mut symbols = self
            .series
            .keys()
            .map(|entry| entry.symbol.as_str())
            .chain(self.collections.keys().map(|key| key.symbol.as_str()));
        let first = symbols.next()?;
        if symbols.all(|s| s == first) {
            Some(first)
        } else {
            None
        }
    }

    /// Finest candle timeframe recorded for `symbol`; the reference timeline
    /// for per-bar reductions of that symbol's tick collections.
    pub fn finest_candle_timeframe(&self, symbol: &str) -> Option<Timeframe> {
        self.series
            .keys()
            .filter(|entry| entry.symbol == symbol && entry.source.is_candle())
            .map(|entry| entry.timeframe)
            .min()
    }

    pub fn has_collection_field(&self, symbol: &str, source: SourceKind, field: &str) -> bool {
        self.collections
            .get(&CollectionKey {
                symbol: symbol.to_string(),
                source,
            })
            .is_some_and(|fields| fields.contains(field))
    }
}

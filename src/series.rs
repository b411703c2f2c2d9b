use crate::types::{SourceKind, Timeframe};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Immutable timestamped series with a parallel availability mask.
///
/// Boolean series store 0.0/1.0; the owning plan node's output schema records
/// boolness. `available[i] == false` means `values[i]` is a placeholder and
/// must not be read semantically.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    timestamps: Arc<[i64]>,
    values: Arc<[f64]>,
    available: Arc<[bool]>,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub source: SourceKind,
    pub field: String,
}

impl Series {
    pub fn new(
        timestamps: Vec<i64>,
        values: Vec<f64>,
        available: Vec<bool>,
        symbol: impl Into<String>,
        timeframe: Timeframe,
        source: SourceKind,
        field: impl Into<String>,
    ) -> Self {
        assert_series_shape(&timestamps, values.len(), available.len());
        Self {
            timestamps: Arc::from(timestamps.into_boxed_slice()),
            values: Arc::from(values.into_boxed_slice()),
            available: Arc::from(available.into_boxed_slice()),
            symbol: symbol.into(),
            timeframe,
            source,
            field: field.into(),
        }
    }

    /// All-available constructor for fully observed input data.
    pub fn from_values(
        timestamps: Vec<i64>,
        values: Vec<f64>,
        symbol: impl Into<String>,
        timeframe: Timeframe,
        source: SourceKind,
        field: impl Into<String>,
    ) -> Self {
        let available = vec![true; values.len()];
        Self::new(timestamps, values, available, symbol, timeframe, source, field)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    #[inline]
    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[inline]
    pub fn availability(&self) -> &[bool] {
        &self.available
    }

    #[inline]
    pub fn last_timestamp(&self) -> Option<i64> {
        self.timestamps.last().copied()
    }

    /// A new series sharing this one's identity with `suffix` rows appended.
    ///
    /// Buffers are re-materialized; readers of the old value keep a
    /// consistent view up to the old length.
    pub fn append(&self, suffix_ts: &[i64], suffix_values: &[f64]) -> Self {
        let mut timestamps = self.timestamps.to_vec();
        let mut values = self.values.to_vec();
        let mut available = self.available.to_vec();
        timestamps.extend_from_slice(suffix_ts);
        values.extend_from_slice(suffix_values);
        available.extend(suffix_values.iter().map(|v| v.is_finite()));
        Self::new(
            timestamps,
            values,
            available,
            self.symbol.clone(),
            self.timeframe,
            self.source,
            self.field.clone(),
        )
    }
}

fn assert_series_shape(timestamps: &[i64], values_len: usize, available_len: usize) {
    assert_eq!(
        timestamps.len(),
        values_len,
        "timestamps and values must have equal length"
    );
    assert_eq!(
        timestamps.len(),
        available_len,
        "timestamps and availability mask must have equal length"
    );
    for pair in timestamps.windows(2) {
        assert!(
            pair[0] < pair[1],
            "timestamps must be strictly increasing: {} then {}",
            pair[0],
            pair[1]
        );
    }
}

/// Raw tick rows (trades, order-book, liquidations) as a timestamped column
/// store. Unlike [`Series`], timestamps are not bar-aligned and may repeat.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    timestamps: Vec<i64>,
    columns: BTreeMap<String, Vec<f64>>,
    pub symbol: String,
    pub source: SourceKind,
}

impl Collection {
    pub fn new(symbol: impl Into<String>, source: SourceKind) -> Self {
        Self {
            timestamps: Vec::new(),
            columns: BTreeMap::new(),
            symbol: symbol.into(),
            source,
        }
    }

    pub fn push_row(&mut self, timestamp: i64, fields: &[(&str, f64)]) {
        if let Some(&last) = self.timestamps.last() {
            assert!(
                timestamp >= last,
                "collection rows must be time-ordered: {last} then {timestamp}"
            );
        }
        self.timestamps.push(timestamp);
        let row = self.timestamps.len();
        for (name, value) in fields {
            let column = self
                .columns
                .entry((*name).to_string())
                .or_insert_with(|| vec![f64::NAN; row - 1]);
            column.push(*value);
        }
        for column in self.columns.values_mut() {
            if column.len() < row {
                column.resize(row, f64::NAN);
            }
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    #[inline]
    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn column(&self, field: &str) -> Option<&[f64]> {
        self.columns.get(field).map(Vec::as_slice)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    #[inline]
    pub fn last_timestamp(&self) -> Option<i64> {
        self.timestamps.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timeframe;

    fn tf(raw: &str) -> Timeframe {
        Timeframe::parse(raw, None).unwrap()
    }

    #[test]
    fn series_append_extends_and_preserves_prefix() {
        let base = Series::from_values(
            vec![1, 2, 3],
            vec![10.0, 11.0, 12.0],
            "BTC",
            tf("1m"),
            SourceKind::Ohlcv,
            "close",
        );
        let grown = base.append(&[4, 5], &[13.0, f64::NAN]);
        assert_eq!(base.len(), 3);
        assert_eq!(grown.len(), 5);
        assert_eq!(&grown.values()[..3], base.values());
        assert!(grown.availability()[3]);
        assert!(!grown.availability()[4]);
    }

    #[test]
    #[should_panic(expected = "strictly increasing")]
    fn series_rejects_non_increasing_timestamps() {
        Series::from_values(
            vec![2, 2],
            vec![1.0, 2.0],
            "BTC",
            tf("1m"),
            SourceKind::Ohlcv,
            "close",
        );
    }

    #[test]
    fn collection_pads_missing_fields_with_nan() {
        let mut trades = Collection::new("BTC", SourceKind::Trades);
        trades.push_row(100, &[("price", 50_000.0), ("amount", 2.0)]);
        trades.push_row(101, &[("price", 50_100.0)]);
        trades.push_row(101, &[("price", 50_200.0), ("amount", 1.0)]);
        assert_eq!(trades.len(), 3);
        let amounts = trades.column("amount").unwrap();
        assert_eq!(amounts[0], 2.0);
        assert!(amounts[1].is_nan());
        assert_eq!(amounts[2], 1.0);
    }
}

//! Timeline joins for node inputs.
//!
//! `inner` emits where every series parent has a row at exactly that
//! timestamp; `ffill` emits on the union of parent timelines with each
//! parent contributing its most recent row. Constant parents never gate the
//! join. The incremental session implements the same rules in streaming
//! form; the parity suite holds the two together.

use crate::eval::Frame;
use crate::kernels::Sample;
use crate::plan::AlignmentPolicy;

#[derive(Debug, Clone, Copy)]
pub(crate) enum ParentFeed<'a> {
    Frame(&'a Frame),
    Constant { value: f64 },
}

#[derive(Debug, Clone, Default)]
pub(crate) struct AlignedRows {
    pub timestamps: Vec<i64>,
    /// One sample per parent per emitted timestamp.
    pub rows: Vec<Vec<Sample>>,
}

pub(crate) fn align(parents: &[ParentFeed], policy: AlignmentPolicy) -> AlignedRows {
    match policy {
        AlignmentPolicy::Inner => align_inner(parents),
        AlignmentPolicy::Ffill => align_ffill(parents),
    }
}

fn series_parents<'a>(parents: &'a [ParentFeed<'a>]) -> Vec<(usize, &'a Frame)> {
    parents
        .iter()
        .enumerate()
        .filter_map(|(idx, feed)| match feed {
            ParentFeed::Frame(frame) => Some((idx, *frame)),
            ParentFeed::Constant { .. } => None,
        })
        .collect()
}

fn align_inner(parents: &[ParentFeed]) -> AlignedRows {
    let series = series_parents(parents);
    let mut out = AlignedRows::default();
    if series.is_empty() {
        return out;
    }

    let mut cursors = vec![0usize; series.len()];
    'outer: loop {
        // Largest current timestamp drives; everyone else catches up.
        let mut target = i64::MIN;
        for ((_, frame), cursor) in series.iter().zip(cursors.iter()) {
            match frame.timestamps.get(*cursor) {
                Some(ts) => target = target.max(*ts),
                None => break 'outer,
            }
        }
        let mut matched = true;
        for ((_, frame), cursor) in series.iter().zip(cursors.iter_mut()) {
            while frame
                .timestamps
                .get(*cursor)
                .is_some_and(|ts| *ts < target)
            {
                *cursor += 1;
            }
            match frame.timestamps.get(*cursor) {
                Some(ts) if *ts == target => {}
                Some(_) => matched = false,
                None => break 'outer,
            }
        }
        if matched {
            let mut row = vec![Sample::missing(); parents.len()];
            for (parent_idx, feed) in parents.iter().enumerate() {
                if let ParentFeed::Constant { value } = feed {
                    row[parent_idx] = Sample::present(*value);
                }
            }
            for ((parent_idx, frame), cursor) in series.iter().zip(cursors.iter()) {
                row[*parent_idx] = frame.row(*cursor)[0];
            }
            out.timestamps.push(target);
            out.rows.push(row);
            for cursor in cursors.iter_mut() {
                *cursor += 1;
            }
        }
    }
    out
}

fn align_ffill(parents: &[ParentFeed]) -> AlignedRows {
    let series = series_parents(parents);
    let mut out = AlignedRows::default();
    if series.is_empty() {
        return out;
    }

    let mut union: Vec<i64> = Vec::new();
    for (_, frame) in &series {
        union.extend_from_slice(&frame.timestamps);
    }
    union.sort_unstable();
    union.dedup();

    let mut cursors = vec![0usize; series.len()];
    for ts in union {
        let mut row = vec![Sample::missing(); parents.len()];
        for (parent_idx, feed) in parents.iter().enumerate() {
            if let ParentFeed::Constant { value } = feed {
                row[parent_idx] = Sample::present(*value);
            }
        }
        for ((parent_idx, frame), cursor) in series.iter().zip(cursors.iter_mut()) {
            while frame
                .timestamps
                .get(*cursor)
                .is_some_and(|frame_ts| *frame_ts <= ts)
            {
                *cursor += 1;
            }
            if *cursor > 0 {
                row[*parent_idx] = frame.row(*cursor - 1)[0];
            }
        }
        out.timestamps.push(ts);
        out.rows.push(row);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::Emit;
    use crate::plan::OutputField;

    fn frame_of(rows: &[(i64, f64)]) -> Frame {
        let mut frame = Frame::with_schema(&[OutputField {
            name: "value".to_string(),
            boolean: false,
        }]);
        for (ts, value) in rows {
            frame.push_emit(*ts, &Emit::single(*value, true));
        }
        frame
    }

    #[test]
    fn inner_join_intersects_timelines() {
        let a = frame_of(&[(1, 10.0), (2, 20.0), (4, 40.0)]);
        let b = frame_of(&[(2, 2.0), (3, 3.0), (4, 4.0)]);
        let out = align(
            &[ParentFeed::Frame(&a), ParentFeed::Frame(&b)],
            AlignmentPolicy::Inner,
        );
        assert_eq!(out.timestamps, vec![2, 4]);
        assert_eq!(out.rows[0][0].value, 20.0);
        assert_eq!(out.rows[0][1].value, 2.0);
        assert_eq!(out.rows[1][0].value, 40.0);
    }

    #[test]
    fn ffill_join_unions_and_carries_forward() {
        let fine = frame_of(&[(1, 1.0), (2, 2.0), (3, 3.0)]);
        let coarse = frame_of(&[(2, 20.0)]);
        let out = align(
            &[ParentFeed::Frame(&fine), ParentFeed::Frame(&coarse)],
            AlignmentPolicy::Ffill,
        );
        assert_eq!(out.timestamps, vec![1, 2, 3]);
        assert!(!out.rows[0][1].available, "coarse has no value yet");
        assert_eq!(out.rows[1][1].value, 20.0);
        assert_eq!(out.rows[2][1].value, 20.0, "carried forward");
        assert_eq!(out.rows[2][0].value, 3.0);
    }

    #[test]
    fn constants_ride_along_without_gating() {
        let a = frame_of(&[(5, 50.0), (6, 60.0)]);
        let out = align(
            &[ParentFeed::Frame(&a), ParentFeed::Constant { value: 7.0 }],
            AlignmentPolicy::Inner,
        );
        assert_eq!(out.timestamps, vec![5, 6]);
        assert_eq!(out.rows[0][1].value, 7.0);
        assert!(out.rows[0][1].available);
    }
}

use std::collections::BTreeMap;

use crate::model::bar::{bucket_start, Bar, BarBuilder};
use crate::model::tick::Tick;

/// Aggregate `ticks` (arrival order) into bars of `interval_ms`, ascending by
/// `interval_start_ms`. Every returned bar has `tick_count >= 1`; windows
/// without trades are omitted, not forward-filled.
///
/// Panics if `interval_ms == 0`.
pub fn resample(ticks: &[Tick], interval_ms: u64) -> Vec<Bar> {
    assert!(interval_ms > 0, "interval_ms must be > 0");

    let mut out = Vec::new();
    let mut current: Option<BarBuilder> = None;
    // Only used if the input is not sorted by timestamp.
    let mut late: BTreeMap<u64, BarBuilder> = BTreeMap::new();

    for tick in ticks {
        if let Some(bar) = current.as_mut() {
            if bar.contains(tick.timestamp_ms) {
                bar.update(tick);
                continue;
            }
            if tick.timestamp_ms < bar.interval_start_ms() {
                merge_late(&mut out, &mut late, tick, interval_ms);
                continue;
            }
        }
        if let Some(done) = current.take() {
            out.push(done.finish());
        }
        current = Some(BarBuilder::new(tick, interval_ms));
    }
    if let Some(done) = current.take() {
        out.push(done.finish());
    }

    if late.is_empty() {
        return out;
    }
    let mut merged: BTreeMap<u64, Bar> = out.into_iter().map(|b| (b.interval_start_ms, b)).collect();
    for (start, builder) in late {
        merged.insert(start, builder.finish());
    }
    merged.into_values().collect()
}

/// A tick older than the open bucket: fold it into its own bucket, pulling a
/// finished bar back into the builder map if one already exists for it.
fn merge_late(
    out: &mut Vec<Bar>,
    late: &mut BTreeMap<u64, BarBuilder>,
    tick: &Tick,
    interval_ms: u64,
) {
    let start = bucket_start(tick.timestamp_ms, interval_ms);
    if let Some(builder) = late.get_mut(&start) {
        builder.update(tick);
        return;
    }
    if let Some(pos) = out.iter().position(|b| b.interval_start_ms == start) {
        let mut builder = BarBuilder::from_bar(&out.remove(pos), interval_ms);
        builder.update(tick);
        late.insert(start, builder);
        return;
    }
    late.insert(start, BarBuilder::new(tick, interval_ms));
}

use tick_pairs::model::tick::{Side, Tick};
use tick_pairs::resample::resample;

fn ticks() -> Vec<Tick> {
    (0..500u64)
        .map(|i| {
            let price = 100.0 + ((i * 37) % 23) as f64 * 0.5;
            Tick::new("btcusdt", price, 0.1 * (i % 7) as f64, i * 997, Side::Buy)
        })
        .collect()
}

#[test]
/// Verifies resampling is pure: the same ticks always give the same bars.
fn resample_is_idempotent() {
    let ticks = ticks();
    assert_eq!(resample(&ticks, 5_000), resample(&ticks, 5_000));
}

#[test]
/// Verifies bar invariants: strictly ascending aligned starts, low <= open,
/// close <= high, and tick_count/volume sum back to the input.
fn bar_invariants_hold() {
    let ticks = ticks();
    let interval = 15_000;
    let bars = resample(&ticks, interval);

    assert!(bars.windows(2).all(|w| w[0].interval_start_ms < w[1].interval_start_ms));
    assert!(bars.iter().all(|b| b.interval_start_ms % interval == 0));
    for b in &bars {
        assert!(b.low <= b.open && b.open <= b.high);
        assert!(b.low <= b.close && b.close <= b.high);
        assert!(b.tick_count >= 1);
    }
    let count: usize = bars.iter().map(|b| b.tick_count).sum();
    assert_eq!(count, ticks.len());
    let volume: f64 = bars.iter().map(|b| b.volume).sum();
    let expected: f64 = ticks.iter().map(|t| t.size).sum();
    assert!((volume - expected).abs() < 1e-9);
}

#[test]
/// Verifies coarser intervals merge the finer bars: a 1m bar equals the
/// aggregate of the 1s bars inside it.
fn coarse_bar_matches_fine_bars() {
    let ticks = ticks();
    let fine = resample(&ticks, 1_000);
    let coarse = resample(&ticks, 60_000);
    let first = &coarse[0];
    let inside: Vec<_> = fine
        .iter()
        .filter(|b| b.interval_start_ms < first.interval_start_ms + 60_000)
        .collect();
    assert!((inside[0].open - first.open).abs() < f64::EPSILON);
    assert!((inside[inside.len() - 1].close - first.close).abs() < f64::EPSILON);
    let high = inside.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    assert!((high - first.high).abs() < f64::EPSILON);
}

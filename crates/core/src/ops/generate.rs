use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::table::{Column, MultiStreamTable, Series};

/// End of the shared sampling grid; every stream spans `[0, T_END]`
pub const T_END: f64 = 100.0;

/// Scale (mean) of the exponential noise added to every sample
pub const NOISE_SCALE: f64 = 0.5;

/// Deterministic when a seed is given, OS entropy otherwise
pub fn seeded_rng(seed: Option<u64>) -> ChaCha20Rng {
    match seed {
        Some(seed) => ChaCha20Rng::seed_from_u64(seed),
        None => ChaCha20Rng::from_entropy(),
    }
}

/// Column name of the i-th stream: `stream-000`, `stream-001`, ...
pub fn stream_name(index: usize) -> String {
    format!("stream-{:03}", index)
}

/// `n` evenly spaced samples from `start` to `stop`, both included
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { stop } else { start + step * i as f64 })
                .collect()
        }
    }
}

// `low + (high - low) * u`; unlike `gen_range` an empty or inverted range is fine
fn uniform<R: Rng + ?Sized>(rng: &mut R, low: f64, high: f64) -> f64 {
    low + (high - low) * rng.gen::<f64>()
}

fn exponential<R: Rng + ?Sized>(rng: &mut R, scale: f64) -> f64 {
    let u: f64 = rng.gen();
    -scale * (1.0 - u).ln()
}

/// One synthetic stream: a linear trend, a sine wave and exponential noise
pub fn make_stream<R: Rng + ?Sized>(rng: &mut R, n_entries: usize) -> Series {
    let t = linspace(0.0, T_END, n_entries);

    let slope = uniform(rng, 0.0, 0.1);
    let periodic_freq = uniform(rng, 1.0, n_entries as f64 / 2.0);
    let periodic_scale = uniform(rng, 0.0, 1.0);

    tracing::debug!(
        slope,
        periodic_freq,
        periodic_scale,
        n_entries,
        "Generated stream parameters"
    );

    let f = t
        .iter()
        .map(|&x| {
            slope * x + periodic_scale * (x / periodic_freq).sin() + exponential(&mut *rng, NOISE_SCALE)
        })
        .collect();

    Series { t, f }
}

/// `t` plus `n_streams` independent stream columns
pub fn make_multi_data<R: Rng + ?Sized>(
    rng: &mut R,
    n_streams: usize,
    n_entries: usize,
) -> MultiStreamTable {
    let mut table = MultiStreamTable::default();

    for i in 0..n_streams {
        let stream = make_stream(rng, n_entries);
        if i == 0 {
            table.t = stream.t;
        }
        table.streams.push(Column {
            name: stream_name(i),
            values: stream.f,
        });
    }

    table
}

/// A single `t`, `f` stream, for the serial layout
pub fn make_single_data<R: Rng + ?Sized>(rng: &mut R, n_entries: usize) -> Series {
    make_stream(rng, n_entries)
}

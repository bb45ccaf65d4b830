//! CPU reference implementation of the equalization pipeline.
//!
//! Mirrors the shader semantics bit-exactly (same floor rounding, same top
//! clamp) so GPU results can be compared against it in tests. The
//! bin-count-generic functions also cover degenerate table sizes the fixed
//! 256-bin GPU path never sees.

/// Per-bin pixel counts. `sum(histogram) == pixels.len()`.
pub fn histogram(pixels: &[u8]) -> Vec<u32> {
    histogram_with_bins(pixels, 256)
}

/// Histogram over an arbitrary bin count. Callers guarantee every sample is
/// below `bins`.
pub fn histogram_with_bins(pixels: &[u8], bins: usize) -> Vec<u32> {
    let mut hist = vec![0u32; bins];
    for &p in pixels {
        hist[p as usize] += 1;
    }
    hist
}

/// Inclusive prefix sum: `out[i] = sum(hist[0..=i])`.
pub fn cumulative(hist: &[u32]) -> Vec<u32> {
    let mut out = Vec::with_capacity(hist.len());
    let mut sum = 0u32;
    for &h in hist {
        sum += h;
        out.push(sum);
    }
    out
}

/// Remapping table: `floor(cum[i] * bins / pixel_count)`, clamped into
/// `[0, bins)`. Floor matches the shader's u32 truncation.
pub fn remap_table(cum: &[u32], pixel_count: u32) -> Vec<u32> {
    let bins = cum.len() as u32;
    let scale = bins as f32 / pixel_count as f32;
    cum.iter()
        .map(|&c| ((c as f32 * scale) as u32).min(bins - 1))
        .collect()
}

/// Apply the table to every pixel.
pub fn back_project(pixels: &[u8], table: &[u32]) -> Vec<u8> {
    pixels.iter().map(|&p| table[p as usize] as u8).collect()
}

/// Full single-frame equalization, 256 bins.
pub fn equalize(pixels: &[u8]) -> Vec<u8> {
    let hist = histogram(pixels);
    let cum = cumulative(&hist);
    let table = remap_table(&cum, pixels.len() as u32);
    back_project(pixels, &table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_non_decreasing(values: &[u32], what: &str) {
        for w in values.windows(2) {
            assert!(w[0] <= w[1], "{what} decreases: {} -> {}", w[0], w[1]);
        }
    }

    #[test]
    fn histogram_counts_every_pixel() {
        let pixels: Vec<u8> = (0..250).map(|i| (i % 7) as u8).collect();
        let hist = histogram(&pixels);
        assert_eq!(hist.iter().sum::<u32>(), 250);
    }

    #[test]
    fn cumulative_is_monotone_and_totals() {
        let pixels: Vec<u8> = (0..=255).cycle().take(1003).collect();
        let hist = histogram(&pixels);
        let cum = cumulative(&hist);
        assert_non_decreasing(&cum, "cumulative histogram");
        assert_eq!(*cum.last().unwrap(), 1003);
    }

    #[test]
    fn remap_is_monotone_and_in_range() {
        let pixels: Vec<u8> = (0..4096).map(|i| (i * 37 % 256) as u8).collect();
        let cum = cumulative(&histogram(&pixels));
        let table = remap_table(&cum, pixels.len() as u32);
        assert_non_decreasing(&table, "remapping table");
        assert!(table.iter().all(|&v| v < 256));
    }

    #[test]
    fn uniform_image_collapses_to_one_bin() {
        // Scenario: all pixels share one value; the step lands near the top.
        let pixels = vec![42u8; 1000];
        let hist = histogram(&pixels);
        assert_eq!(hist[42], 1000);
        assert_eq!(hist.iter().sum::<u32>(), 1000);

        let cum = cumulative(&hist);
        assert_eq!(cum[41], 0);
        assert_eq!(cum[42], 1000);
        assert_eq!(cum[255], 1000);

        let table = remap_table(&cum, 1000);
        assert_eq!(table[42], 255);

        let out = equalize(&pixels);
        assert!(out.iter().all(|&p| p == 255));
    }

    #[test]
    fn two_by_two_extremes() {
        // [0, 0, 255, 255] with scale factor 256 / 4 = 64.
        let pixels = vec![0u8, 0, 255, 255];
        let hist = histogram(&pixels);
        assert_eq!(hist[0], 2);
        assert_eq!(hist[255], 2);
        assert_eq!(hist.iter().sum::<u32>(), 4);

        let cum = cumulative(&hist);
        assert_eq!(cum[0], 2);
        assert_eq!(cum[254], 2);
        assert_eq!(cum[255], 4);

        let table = remap_table(&cum, 4);
        // floor(2 * 64) = 128, floor(4 * 64) = 256 clamped to 255.
        assert_eq!(table[0], 128);
        assert_eq!(table[255], 255);

        let out = equalize(&pixels);
        assert_eq!(out, vec![128, 128, 255, 255]);
    }

    #[test]
    fn single_bin_degenerates() {
        // L = 1: cumulative equals the histogram, everything maps to bin 0.
        let pixels = vec![0u8; 17];
        let hist = histogram_with_bins(&pixels, 1);
        let cum = cumulative(&hist);
        assert_eq!(cum, hist);

        let table = remap_table(&cum, 17);
        assert_eq!(table, vec![0]);

        let out = back_project(&pixels, &table);
        assert!(out.iter().all(|&p| p == 0));
    }

    #[test]
    fn re_equalization_stays_monotone() {
        let pixels: Vec<u8> = (0..3000).map(|i| ((i * i) % 256) as u8).collect();
        let once = equalize(&pixels);
        let cum = cumulative(&histogram(&once));
        let table = remap_table(&cum, once.len() as u32);
        for w in table.windows(2) {
            assert!(w[0] <= w[1]);
        }
    }
}

/// Median of the first `n` values, reordering them in place.
///
/// Uses `select_nth_unstable` for O(n) median without full sort.
/// Returns NaN for an empty slice.
pub fn compute_median(pixel_values: &mut [f32], n: usize) -> f32 {
    let pixel_values = &mut pixel_values[..n];
    if n == 0 {
        f32::NAN
    } else if n == 1 {
        pixel_values[0]
    } else if n % 2 == 1 {
        let mid = n / 2;
        *pixel_values
            .select_nth_unstable_by(mid, |a, b| a.total_cmp(b))
            .1
    } else {
        let mid = n / 2;
        pixel_values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
        pixel_values[..mid].select_nth_unstable_by(mid - 1, |a, b| a.total_cmp(b));
        (pixel_values[mid - 1] + pixel_values[mid]) / 2.0
    }
}

/// Median of the finite values of an iterator (NaN when there are none).
pub fn nanmedian<'a>(values: impl IntoIterator<Item = &'a f32>) -> f32 {
    let mut finite: Vec<f32> = values.into_iter().copied().filter(|v| v.is_finite()).collect();
    let n = finite.len();
    compute_median(&mut finite, n)
}

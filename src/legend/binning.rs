//! Statistical binning of numeric columns into color bins
//!
//! Two methods are available:
//! - quantiles: `N` upper bounds at `(i+1)/N`, cheap for large columns;
//! - ckmeans: optimal 1-D clustering minimizing within-cluster variance,
//!   computed with the divide-and-conquer dynamic program in O(k·n·log n).

use super::color::ColorArray;
use super::color_map::ColorMap;

/// One legend bin; values up to and including `upper_bound` use `color`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorBin {
    pub upper_bound: f64,
    pub color: ColorArray,
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Quantile of already-sorted values, `p` in [0, 1].
pub fn quantile_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    let n = sorted.len();
    if n == 0 || !(0.0..=1.0).contains(&p) {
        return None;
    }
    if p == 1.0 {
        return sorted.last().copied();
    }
    if p == 0.0 {
        return sorted.first().copied();
    }
    let idx = n as f64 * p;
    if idx.fract() != 0.0 {
        return Some(sorted[idx.ceil() as usize - 1]);
    }
    let idx = idx as usize;
    if n % 2 == 0 {
        Some((sorted[idx - 1] + sorted[idx]) / 2.0)
    } else {
        Some(sorted[idx])
    }
}

/// Partition values into at most `n_clusters` groups minimizing the total
/// within-group sum of squares. Clusters are returned in ascending order.
///
/// Values that are all equal form a single cluster.
pub fn ckmeans(values: &[f64], n_clusters: usize) -> Vec<Vec<f64>> {
    let data = sorted(values);
    let n = data.len();
    if n == 0 || n_clusters == 0 {
        return Vec::new();
    }
    if data[0] == data[n - 1] {
        return vec![data];
    }
    let k = n_clusters.min(n);

    let mut matrix = vec![vec![0.0f64; n]; k];
    let mut backtrack = vec![vec![0usize; n]; k];
    fill_matrices(&data, &mut matrix, &mut backtrack);

    let mut clusters = vec![Vec::new(); k];
    let mut right = n - 1;
    for cluster in (0..k).rev() {
        let left = backtrack[cluster][right];
        clusters[cluster] = data[left..=right].to_vec();
        if cluster > 0 {
            right = left.saturating_sub(1);
        }
    }
    clusters
}

struct PrefixSums {
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl PrefixSums {
    /// Sum of squared deviations of `data[j..=i]` from its mean
    fn ssq(&self, j: usize, i: usize) -> f64 {
        let s = if j > 0 {
            let count = (i - j + 1) as f64;
            let mean = (self.sum[i] - self.sum[j - 1]) / count;
            self.sum_sq[i] - self.sum_sq[j - 1] - count * mean * mean
        } else {
            self.sum_sq[i] - self.sum[i] * self.sum[i] / (i + 1) as f64
        };
        s.max(0.0)
    }
}

fn fill_matrices(data: &[f64], matrix: &mut [Vec<f64>], backtrack: &mut [Vec<usize>]) {
    let n = data.len();
    // Shifting by the median keeps the prefix sums well conditioned
    let shift = data[n / 2];
    let mut sums = PrefixSums {
        sum: Vec::with_capacity(n),
        sum_sq: Vec::with_capacity(n),
    };
    for (i, value) in data.iter().enumerate() {
        let shifted = value - shift;
        let (prev_sum, prev_sq) = if i == 0 {
            (0.0, 0.0)
        } else {
            (sums.sum[i - 1], sums.sum_sq[i - 1])
        };
        sums.sum.push(prev_sum + shifted);
        sums.sum_sq.push(prev_sq + shifted * shifted);
        matrix[0][i] = sums.ssq(0, i);
        backtrack[0][i] = 0;
    }

    let k = matrix.len();
    for cluster in 1..k {
        // Only the last column matters for the final cluster
        let i_min = if cluster < k - 1 { cluster } else { n - 1 };
        fill_column(i_min, n - 1, cluster, matrix, backtrack, &sums);
    }
}

fn fill_column(
    i_min: usize,
    i_max: usize,
    cluster: usize,
    matrix: &mut [Vec<f64>],
    backtrack: &mut [Vec<usize>],
    sums: &PrefixSums,
) {
    if i_min > i_max {
        return;
    }
    let n = matrix[0].len();
    let i = (i_min + i_max) / 2;

    matrix[cluster][i] = matrix[cluster - 1][i - 1];
    backtrack[cluster][i] = i;

    let mut j_low = cluster;
    if i_min > cluster {
        j_low = j_low.max(backtrack[cluster][i_min - 1]);
    }
    j_low = j_low.max(backtrack[cluster - 1][i]);

    let mut j_high = i - 1;
    if i_max < n - 1 {
        j_high = j_high.min(backtrack[cluster][i_max + 1]);
    }

    let mut j = j_high;
    while j >= j_low {
        let s_ji = sums.ssq(j, i);
        if s_ji + matrix[cluster - 1][j_low - 1] >= matrix[cluster][i] {
            break;
        }

        let s_jlow = sums.ssq(j_low, i) + matrix[cluster - 1][j_low - 1];
        if s_jlow < matrix[cluster][i] {
            matrix[cluster][i] = s_jlow;
            backtrack[cluster][i] = j_low;
        }
        j_low += 1;

        let s_j = s_ji + matrix[cluster - 1][j - 1];
        if s_j < matrix[cluster][i] {
            matrix[cluster][i] = s_j;
            backtrack[cluster][i] = j;
        }

        if j == 0 {
            break;
        }
        j -= 1;
    }

    if i > i_min {
        fill_column(i_min, i - 1, cluster, matrix, backtrack, sums);
    }
    fill_column(i + 1, i_max, cluster, matrix, backtrack, sums);
}

/// Color position of bin `i` out of `count`, midpoint for a single bin
fn bin_fraction(i: usize, count: usize) -> f64 {
    if count > 1 {
        i as f64 / (count - 1) as f64
    } else {
        0.5
    }
}

/// `count` quantile bins, colors spread evenly across the gradient.
pub fn quantile_bins(values: &[f64], count: usize, color_map: &ColorMap) -> Vec<ColorBin> {
    let data = sorted(values);
    let count = count.min(data.len());
    (0..count)
        .filter_map(|i| {
            let upper_bound = quantile_sorted(&data, (i + 1) as f64 / count as f64)?;
            Some(ColorBin {
                upper_bound,
                color: color_map.sample(bin_fraction(i, count)),
            })
        })
        .collect()
}

/// ckmeans bins; clusters holding only the previous bin's maximum are dropped.
pub fn ckmeans_bins(values: &[f64], count: usize, color_map: &ColorMap) -> Vec<ColorBin> {
    let clusters = ckmeans(values, count.min(values.len()));

    let mut bounds: Vec<f64> = Vec::with_capacity(clusters.len());
    for cluster in &clusters {
        let Some(&max) = cluster.last() else { continue };
        // Clusters are ascending, so max == previous bound means every value repeats it
        if bounds.last().is_some_and(|&prev| prev == max) {
            continue;
        }
        bounds.push(max);
    }

    let total = bounds.len();
    bounds
        .into_iter()
        .enumerate()
        .map(|(i, upper_bound)| ColorBin {
            upper_bound,
            color: color_map.sample(bin_fraction(i, total)),
        })
        .collect()
}

/// Bins from explicit upper bounds.
///
/// The column maximum is appended when the bounds stop short of it, bounds
/// at or below the minimum are dropped (the minimum becomes the bottom
/// label instead), and so are bounds above the first one reaching the
/// maximum. Colors are sampled by position in the full list, so a truncated
/// legend keeps the colors of the untruncated one.
pub fn boundary_bins(bounds: &[f64], min: f64, max: f64, color_map: &ColorMap) -> Vec<ColorBin> {
    let mut bounds = bounds.to_vec();
    if bounds.last().is_some_and(|&last| last < max) {
        bounds.push(max);
    }
    let total = bounds.len();

    bounds
        .iter()
        .enumerate()
        .filter(|&(i, &bound)| bound > min && (i == 0 || bounds[i - 1] < max))
        .map(|(i, &bound)| ColorBin {
            upper_bound: bound.min(max),
            color: color_map.sample(if total > 1 {
                i as f64 / (total - 1) as f64
            } else {
                0.0
            }),
        })
        .collect()
}

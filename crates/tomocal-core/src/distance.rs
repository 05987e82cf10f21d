//! Exact Euclidean distance transform of binary masks.
//!
//! Uses the separable lower-envelope algorithm of Felzenszwalb & Huttenlocher,
//! "Distance Transforms of Sampled Functions" (2012), which gives the same
//! distances as a brute-force search in linear time.

use nalgebra::DMatrix;

/// 1D squared distance transform of `f` into `d`.
fn dt1d(f: &[f64], d: &mut [f64], v: &mut [usize], z: &mut [f64]) {
    let n = f.len();
    if n == 0 {
        return;
    }
    let mut k = 0usize;
    v[0] = 0;
    z[0] = f64::NEG_INFINITY;
    z[1] = f64::INFINITY;
    for q in 1..n {
        let qf = q as f64;
        loop {
            let p = v[k];
            let pf = p as f64;
            let s = ((f[q] + qf * qf) - (f[p] + pf * pf)) / (2.0 * qf - 2.0 * pf);
            if s <= z[k] {
                // z[0] is -inf, so k never underflows here.
                k -= 1;
                continue;
            }
            k += 1;
            v[k] = q;
            z[k] = s;
            z[k + 1] = f64::INFINITY;
            break;
        }
    }
    k = 0;
    for (q, out) in d.iter_mut().enumerate() {
        let qf = q as f64;
        while z[k + 1] < qf {
            k += 1;
        }
        let dq = qf - v[k] as f64;
        *out = dq * dq + f[v[k]];
    }
}

/// Distance from every `true` pixel to the nearest `false` pixel.
///
/// Background pixels get `0`. If the mask has no background at all every
/// pixel is `f64::INFINITY`.
pub fn distance_to_background(mask: &DMatrix<bool>) -> DMatrix<f64> {
    let (rows, cols) = mask.shape();
    if rows == 0 || cols == 0 {
        return DMatrix::zeros(rows, cols);
    }
    // Finite stand-in for infinity keeps the envelope arithmetic NaN-free.
    let big = 4.0 * ((rows * rows + cols * cols) as f64 + 1.0);
    let mut grid = DMatrix::from_fn(rows, cols, |r, c| if mask[(r, c)] { big } else { 0.0 });

    let n = rows.max(cols);
    let mut f = vec![0.0; n];
    let mut d = vec![0.0; n];
    let mut v = vec![0usize; n];
    let mut z = vec![0.0; n + 1];

    for c in 0..cols {
        for r in 0..rows {
            f[r] = grid[(r, c)];
        }
        dt1d(&f[..rows], &mut d[..rows], &mut v, &mut z);
        for r in 0..rows {
            grid[(r, c)] = d[r];
        }
    }
    for r in 0..rows {
        for c in 0..cols {
            f[c] = grid[(r, c)];
        }
        dt1d(&f[..cols], &mut d[..cols], &mut v, &mut z);
        for c in 0..cols {
            grid[(r, c)] = d[c];
        }
    }

    grid.map(|sq| if sq >= big * 0.5 { f64::INFINITY } else { sq.sqrt() })
}

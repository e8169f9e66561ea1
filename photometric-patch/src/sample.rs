use crate::Raster;
use num_traits::Float;

/// Bilinearly interpolates `raster` at the subpixel location `(x + offset, y + offset)`.
///
/// The border policy is asymmetric on purpose:
///
/// * Inside the last valid cell the four surrounding samples are blended.
/// * On the last column (or row) a sample is only produced when the fractional part
///   along that axis is zero, in which case it degrades to linear interpolation along
///   the other axis. Any attempt to interpolate past the last pixel yields `fill`.
/// * On the bottom right corner the raw sample is returned only when both fractional
///   parts are zero.
/// * Everything else, including non-finite coordinates, yields `fill`.
///
/// This allows sampling exactly at the last pixel without ever reading outside the raster.
pub fn interpolate<T>(raster: &Raster, x: T, y: T, fill: T, offset: T) -> T
where
    T: Float + From<f32>,
{
    if raster.is_empty() {
        return fill;
    }
    let max_cols = raster.width() as i64 - 1;
    let max_rows = raster.height() as i64 - 1;

    let x = x + offset;
    let y = y + offset;
    let (xfloor, yfloor) = (x.floor(), y.floor());
    let (xi, yi) = match (xfloor.to_i64(), yfloor.to_i64()) {
        (Some(xi), Some(yi)) => (xi, yi),
        _ => return fill,
    };
    let xf = x - xfloor;
    let yf = y - yfloor;

    let at = |c: i64, r: i64| -> T { From::from(raster.get(c as usize, r as usize)) };
    let one = T::one();

    if xi >= 0 && xi < max_cols && yi >= 0 && yi < max_rows {
        let wx = one - xf;
        (one - yf) * (at(xi, yi) * wx + at(xi + 1, yi) * xf)
            + yf * (at(xi, yi + 1) * wx + at(xi + 1, yi + 1) * xf)
    } else if xi == max_cols && yi >= 0 && yi < max_rows {
        if xf > T::zero() {
            fill
        } else {
            (one - yf) * at(xi, yi) + yf * at(xi, yi + 1)
        }
    } else if yi == max_rows && xi >= 0 && xi < max_cols {
        if yf > T::zero() {
            fill
        } else {
            (one - xf) * at(xi, yi) + xf * at(xi + 1, yi)
        }
    } else if xi == max_cols && yi == max_rows {
        if xf > T::zero() || yf > T::zero() {
            fill
        } else {
            at(xi, yi)
        }
    } else {
        fill
    }
}

/// Computes the image gradient at a subpixel location using central differences of
/// [`interpolate`] one pixel to either side.
///
/// Returns `(d/dx, d/dy)`. Near the border the differences use `0` as the fill value,
/// so the gradient is only meaningful at least one pixel inside the raster.
pub fn gradient<T>(raster: &Raster, x: T, y: T) -> (T, T)
where
    T: Float + From<f32>,
{
    let zero = T::zero();
    let one = T::one();
    let half: T = From::from(0.5f32);
    let gx = half
        * (interpolate(raster, x + one, y, zero, zero) - interpolate(raster, x - one, y, zero, zero));
    let gy = half
        * (interpolate(raster, x, y + one, zero, zero) - interpolate(raster, x, y - one, zero, zero));
    (gx, gy)
}

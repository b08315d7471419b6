//! Point spread functions.

use enum_dispatch::enum_dispatch;
use statrs::function::erf::erf;
use std::f64::consts::PI;

use crate::error::{Error, Result};

/// A normalized 2D intensity distribution describing where photons from a
/// point emitter land in the image plane.
///
/// The origin convention used throughout this crate is that the upper-left
/// corner of pixel `(0, 0)` sits at coordinate `(0, 0)` — not the
/// pixel-center convention some optics code uses — because the optics
/// edge-clipping computation is defined in terms of that corner.
#[enum_dispatch]
pub trait Psf {
    /// The integrated fraction of the PSF, centered at `(x0, y0)`, falling
    /// into the rectangle whose upper-left corner is `(x, y)` and whose
    /// sides are `(dx, dy)`. Integrating `bin` over a complete covering of
    /// the plane sums to 1; over a bounded region it sums to at most 1.
    fn bin(&self, x: f64, y: f64, x0: f64, y0: f64, dx: f64, dy: f64) -> f64;

    /// The point value of the PSF's probability density at `(x, y)`.
    fn sample(&self, x: f64, y: f64, x0: f64, y0: f64) -> f64;
}

/// A PSF, closed over the variants this crate knows how to build.
#[enum_dispatch(Psf)]
#[derive(Debug, Clone, Copy)]
pub enum AnyPsf {
    Gaussian2D(Gaussian2D),
}

/// An isotropic 2D Gaussian PSF parameterized by full width at half maximum.
#[derive(Debug, Clone, Copy)]
pub struct Gaussian2D {
    fwhm: f64,
}

impl Gaussian2D {
    pub fn new(fwhm: f64) -> Result<Self> {
        if fwhm <= 0.0 {
            return Err(Error::invalid_argument("fwhm must be greater than 0"));
        }
        Ok(Self { fwhm })
    }

    pub fn fwhm(&self) -> f64 {
        self.fwhm
    }

    fn sigma(&self) -> f64 {
        self.fwhm / 2.3548
    }
}

impl Psf for Gaussian2D {
    fn bin(&self, x: f64, y: f64, x0: f64, y0: f64, dx: f64, dy: f64) -> f64 {
        let scale = std::f64::consts::SQRT_2 * self.sigma();
        let fx = erf((x - x0 + dx) / scale) - erf((x - x0) / scale);
        let fy = erf((y - y0 + dy) / scale) - erf((y - y0) / scale);
        0.25 * fx * fy
    }

    fn sample(&self, x: f64, y: f64, x0: f64, y0: f64) -> f64 {
        let sigma = self.sigma();
        let norm = 1.0 / (2.0 * PI * sigma * sigma);
        let exponent = -((x - x0).powi(2) + (y - y0).powi(2)) / (2.0 * sigma * sigma);
        norm * exponent.exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn fwhm_must_be_positive() {
        assert!(Gaussian2D::new(0.0).is_err());
        assert!(Gaussian2D::new(-1.0).is_err());
    }

    #[test]
    fn bin_over_the_entire_plane_sums_to_one() {
        let psf = Gaussian2D::new(1.5).unwrap();
        let n = 200i64;
        let mut total = 0.0;
        for i in -n..n {
            for j in -n..n {
                total += psf.bin(i as f64, j as f64, 0.0, 0.0, 1.0, 1.0);
            }
        }
        assert_relative_eq!(total, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn sample_integrates_numerically_to_one() {
        let psf = Gaussian2D::new(1.5).unwrap();
        let step = 0.05;
        let n = 4000i64;
        let mut total = 0.0;
        for i in -n..n {
            let x = i as f64 * step;
            for j in -n..n {
                let y = j as f64 * step;
                total += psf.sample(x, y, 0.0, 0.0) * step * step;
            }
        }
        assert_relative_eq!(total, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn bin_matches_closed_form_erf_expression() {
        let fwhm = 1.5;
        let psf = Gaussian2D::new(fwhm).unwrap();
        let sigma = fwhm / 2.3548;
        let scale = std::f64::consts::SQRT_2 * sigma;
        let (x, y, x0, y0) = (1.0, -2.0, 0.3, -0.1);
        let expected = 0.25
            * (erf((x - x0 + 1.0) / scale) - erf((x - x0) / scale))
            * (erf((y - y0 + 1.0) / scale) - erf((y - y0) / scale));
        assert_relative_eq!(psf.bin(x, y, x0, y0, 1.0, 1.0), expected);
    }
}

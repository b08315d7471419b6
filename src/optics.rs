//! Optics: PSF-weighted, photon-conserving image formation.

use enum_dispatch::enum_dispatch;

use crate::error::{Error, Result};
use crate::psf::{AnyPsf, Psf};
use crate::sample::SampleResponse;

/// A non-negative integer photon image, row-major, shape `(height, width)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotonImage {
    pub height: usize,
    pub width: usize,
    pub data: Vec<u64>,
}

impl PhotonImage {
    pub fn get(&self, row: usize, col: usize) -> u64 {
        self.data[row * self.width + col]
    }

    pub fn sum(&self) -> u64 {
        self.data.iter().sum()
    }
}

/// Forms a photon image from a sample's emitters and a PSF.
#[enum_dispatch]
pub trait Optics {
    fn response(
        &self,
        x_lim: (i64, i64),
        y_lim: (i64, i64),
        sample_response: &SampleResponse,
    ) -> Result<PhotonImage>;
}

#[enum_dispatch(Optics)]
#[derive(Debug, Clone)]
pub enum AnyOptics {
    SimpleMicroscope(SimpleMicroscope),
}

/// The reference optics model: a single PSF applied to every emitter,
/// accumulated with integer photon conservation per-emitter via
/// [`safe_round`].
#[derive(Debug, Clone)]
pub struct SimpleMicroscope {
    psf: AnyPsf,
}

impl SimpleMicroscope {
    pub fn new(psf: AnyPsf) -> Self {
        Self { psf }
    }
}

impl Optics for SimpleMicroscope {
    fn response(
        &self,
        x_lim: (i64, i64),
        y_lim: (i64, i64),
        sample_response: &SampleResponse,
    ) -> Result<PhotonImage> {
        if x_lim.0 >= x_lim.1 {
            return Err(Error::invalid_argument(
                "the first value of x_lim must be less than the second value",
            ));
        }
        if y_lim.0 >= y_lim.1 {
            return Err(Error::invalid_argument(
                "the first value of y_lim must be less than the second value",
            ));
        }

        let width = (x_lim.1 - x_lim.0) as usize;
        let height = (y_lim.1 - y_lim.0) as usize;
        let mut accumulator = vec![0.0f64; height * width];

        for emitter in sample_response {
            if emitter.photons == 0 {
                continue;
            }
            let clipped_fraction = self.psf.bin(
                x_lim.0 as f64,
                y_lim.0 as f64,
                emitter.x,
                emitter.y,
                width as f64,
                height as f64,
            );
            let expected = emitter.photons as f64 * clipped_fraction;

            let mut distribution = vec![0.0f64; height * width];
            for row in 0..height {
                let y = (y_lim.0 + row as i64) as f64;
                for col in 0..width {
                    let x = (x_lim.0 + col as i64) as f64;
                    // bin(...) already sums to `clipped_fraction` over the whole
                    // image rectangle, so weighting by raw photon count (not
                    // `expected`) is what makes the accumulated sum equal
                    // `expected` rather than `expected * clipped_fraction`.
                    distribution[row * width + col] =
                        self.psf.bin(x, y, emitter.x, emitter.y, 1.0, 1.0) * emitter.photons as f64;
                }
            }

            let rounded = safe_round(&distribution, expected.round());
            for (acc, d) in accumulator.iter_mut().zip(&rounded) {
                *acc += *d as f64;
            }
        }

        let data = accumulator.into_iter().map(|v| v.round() as u64).collect();
        Ok(PhotonImage {
            height,
            width,
            data,
        })
    }
}

/// Rounds `values` componentwise so that the integer total matches
/// `target` exactly, nudging the pixels with the largest rounding residual
/// by the sign of the shortfall.
fn safe_round(values: &[f64], target: f64) -> Vec<i64> {
    let mut rounded: Vec<i64> = values.iter().map(|v| v.round() as i64).collect();
    let rounded_sum: i64 = rounded.iter().sum();
    let k = target as i64 - rounded_sum;
    if k == 0 {
        return rounded;
    }

    let mut residuals: Vec<(usize, f64)> = values
        .iter()
        .zip(&rounded)
        .enumerate()
        .map(|(i, (v, r))| (i, (v - *r as f64).abs()))
        .collect();
    residuals.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());

    let adjustment = k.signum();
    for (index, _) in residuals.into_iter().take(k.unsigned_abs() as usize) {
        rounded[index] += adjustment;
    }
    rounded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::EmitterResponse;
    use crate::psf::Gaussian2D;

    #[test]
    fn safe_round_preserves_the_target_sum() {
        let values = vec![0.4, 0.4, 0.4, 0.4];
        let rounded = safe_round(&values, 2.0);
        assert_eq!(rounded.iter().sum::<i64>(), 2);
    }

    #[test]
    fn safe_round_is_a_no_op_when_naive_rounding_already_matches() {
        let values = vec![0.1, 0.9, 2.0];
        let rounded = safe_round(&values, 3.0);
        assert_eq!(rounded, vec![0, 1, 2]);
    }

    #[test]
    fn inverted_limits_are_rejected() {
        let optics = SimpleMicroscope::new(AnyPsf::Gaussian2D(Gaussian2D::new(3.0).unwrap()));
        let result = optics.response((32, 0), (0, 32), &Vec::new());
        assert!(result.is_err());
    }

    #[test]
    fn centered_emitter_conserves_photons_approximately() {
        let optics = SimpleMicroscope::new(AnyPsf::Gaussian2D(Gaussian2D::new(3.0).unwrap()));
        let sample_response = vec![EmitterResponse::new(4.0, 4.0, 4.0, 100, 500.0).unwrap()];
        let image = optics.response((0, 32), (0, 32), &sample_response).unwrap();
        assert_eq!(image.height, 32);
        assert_eq!(image.width, 32);
        assert_eq!(image.sum(), 100);
    }

    #[test]
    fn edge_clipped_emitter_loses_photons() {
        let optics = SimpleMicroscope::new(AnyPsf::Gaussian2D(Gaussian2D::new(3.0).unwrap()));
        let sample_response = vec![EmitterResponse::new(0.0, 0.0, 0.0, 100, 500.0).unwrap()];
        let image = optics.response((0, 16), (0, 16), &sample_response).unwrap();
        assert!(image.sum() < 100);
    }

    #[test]
    fn output_shape_matches_limits() {
        let optics = SimpleMicroscope::new(AnyPsf::Gaussian2D(Gaussian2D::new(3.0).unwrap()));
        let image = optics.response((5, 20), (10, 18), &Vec::new()).unwrap();
        assert_eq!(image.width, 15);
        assert_eq!(image.height, 8);
    }
}

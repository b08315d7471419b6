//! Detector: the CMOS sensor noise model.

use enum_dispatch::enum_dispatch;

use crate::error::{Error, Result};
use crate::optics::PhotonImage;
use crate::rng::RandomDraws;

/// The detector's configured output word size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitDepth {
    Eight,
    Ten,
    Twelve,
    Sixteen,
    ThirtyTwo,
}

impl BitDepth {
    fn bits(self) -> u32 {
        match self {
            BitDepth::Eight => 8,
            BitDepth::Ten => 10,
            BitDepth::Twelve => 12,
            BitDepth::Sixteen => 16,
            BitDepth::ThirtyTwo => 32,
        }
    }

    fn max_value(self) -> f64 {
        (2f64.powi(self.bits() as i32)) - 1.0
    }
}

/// A quantized ADU image, shape `(height, width)`.
#[derive(Debug, Clone, PartialEq)]
pub struct AduImage {
    pub height: usize,
    pub width: usize,
    pub bit_depth: BitDepth,
    pub data: Vec<u32>,
}

/// Turns a photon image into a quantized sensor frame.
#[enum_dispatch]
pub trait Detector {
    fn response(
        &self,
        photons: Option<&PhotonImage>,
        rng: &mut dyn RandomDraws,
    ) -> Result<AduImage>;
}

#[enum_dispatch(Detector)]
#[derive(Debug, Clone)]
pub enum AnyDetector {
    SimpleCmosCamera(SimpleCmosCamera),
}

/// The reference CMOS sensor model: Poisson shot noise, Gaussian read
/// noise, gain, baseline offset, and saturation — in that order.
#[derive(Debug, Clone)]
pub struct SimpleCmosCamera {
    baseline: f64,
    bit_depth: BitDepth,
    dark_noise: f64,
    num_pixels: (usize, usize),
    quantum_efficiency: f64,
    sensitivity: f64,
}

impl SimpleCmosCamera {
    pub fn new(
        baseline: f64,
        bit_depth: BitDepth,
        dark_noise: f64,
        num_pixels: (usize, usize),
        quantum_efficiency: f64,
        sensitivity: f64,
    ) -> Result<Self> {
        if baseline < 0.0 {
            return Err(Error::invalid_argument("baseline must be non-negative"));
        }
        if dark_noise < 0.0 {
            return Err(Error::invalid_argument("dark_noise must be non-negative"));
        }
        if !(0.0..=1.0).contains(&quantum_efficiency) {
            return Err(Error::invalid_argument(
                "quantum_efficiency must be in [0, 1]",
            ));
        }
        if sensitivity <= 0.0 {
            return Err(Error::invalid_argument("sensitivity must be greater than 0"));
        }
        Ok(Self {
            baseline,
            bit_depth,
            dark_noise,
            num_pixels,
            quantum_efficiency,
            sensitivity,
        })
    }

    pub fn num_pixels(&self) -> (usize, usize) {
        self.num_pixels
    }

    pub fn bit_depth(&self) -> BitDepth {
        self.bit_depth
    }
}

impl Detector for SimpleCmosCamera {
    fn response(
        &self,
        photons: Option<&PhotonImage>,
        rng: &mut dyn RandomDraws,
    ) -> Result<AduImage> {
        let (height, width) = self.num_pixels;
        let pixel_count = height * width;

        let expected_electrons: Vec<f64> = match photons {
            None => vec![0.0; pixel_count],
            Some(image) => {
                if image.height != height || image.width != width {
                    return Err(Error::invalid_argument(
                        "photon image shape must equal the detector's num_pixels",
                    ));
                }
                image
                    .data
                    .iter()
                    .map(|&p| self.quantum_efficiency * p as f64)
                    .collect()
            }
        };

        // Shot noise over the whole array first, then read noise over the
        // whole array — preserving this order keeps the RNG draw sequence,
        // and therefore the frame, reproducible for a given seed.
        let photoelectrons: Vec<f64> = expected_electrons
            .iter()
            .map(|&mean| if mean > 0.0 { rng.poisson(mean) } else { 0.0 })
            .collect();

        let electrons: Vec<f64> = photoelectrons
            .iter()
            .map(|&pe| pe + rng.normal(0.0, self.dark_noise))
            .collect();

        let max_value = self.bit_depth.max_value();
        let data = electrons
            .iter()
            .map(|&e| {
                let adu = e * self.sensitivity + self.baseline;
                adu.clamp(0.0, max_value) as u32
            })
            .collect();

        Ok(AduImage {
            height,
            width,
            bit_depth: self.bit_depth,
            data,
        })
    }
}

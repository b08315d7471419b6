//! Samples: the object under illumination.

use enum_dispatch::enum_dispatch;

use crate::emitter::{Emitter, EmitterResponse};
use crate::error::{Error, Result};
use crate::source::AnySource;

pub type SampleResponse = Vec<EmitterResponse>;

/// Aggregates the emitters making up a sample and reports their combined
/// photon emission over a step.
///
/// A closed, tagged set of variants, same as
/// [`crate::source::Source`] and [`crate::psf::Psf`] — except `Emitters`,
/// whose whole purpose is to hold a heterogeneous, extensible collection of
/// [`Emitter`] trait objects behind one variant.
#[enum_dispatch]
pub trait Sample {
    fn response(&mut self, time: f64, dt: f64, source: &AnySource) -> Result<SampleResponse>;
}

#[enum_dispatch(Sample)]
#[derive(Clone)]
pub enum AnySample {
    NullSample(NullSample),
    ConstantEmitters(ConstantEmitters),
    Emitters(Emitters),
}

/// A sample with no emitters; always reports an empty response.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSample;

impl Sample for NullSample {
    fn response(&mut self, _time: f64, _dt: f64, _source: &AnySource) -> Result<SampleResponse> {
        Ok(Vec::new())
    }
}

/// A collection of emitters that each emit photons at a fixed rate,
/// independent of illumination. `floor(rate * dt)` photons per step; cannot
/// be parallelized since there is no per-emitter state to isolate.
#[derive(Debug, Clone)]
pub struct ConstantEmitters {
    x: Vec<f64>,
    y: Vec<f64>,
    rate: Vec<f64>,
    z: f64,
    wavelength: f64,
}

impl ConstantEmitters {
    pub fn new(x: Vec<f64>, y: Vec<f64>, rate: Vec<f64>, z: f64, wavelength: f64) -> Result<Self> {
        if x.len() != y.len() || x.len() != rate.len() {
            return Err(Error::invalid_argument(
                "x, y, and rate must all have the same length",
            ));
        }
        if rate.iter().any(|&r| r < 0.0) {
            return Err(Error::invalid_argument("rate must be non-negative"));
        }
        if wavelength <= 0.0 {
            return Err(Error::invalid_argument("wavelength must be greater than 0"));
        }
        Ok(Self {
            x,
            y,
            rate,
            z,
            wavelength,
        })
    }
}

impl Sample for ConstantEmitters {
    fn response(&mut self, _time: f64, dt: f64, _source: &AnySource) -> Result<SampleResponse> {
        self.x
            .iter()
            .zip(&self.y)
            .zip(&self.rate)
            .map(|((&x, &y), &rate)| {
                let photons = (rate * dt).floor().max(0.0) as u64;
                EmitterResponse::new(x, y, self.z, photons, self.wavelength)
            })
            .collect()
    }
}

/// A heterogeneous collection of [`Emitter`]s, evaluated in stored order.
///
/// When `parallel` is set, emitter `response` calls fan out across a
/// `rayon` thread pool; the result vector preserves the original order
/// regardless, since Optics' photon accumulation must stay deterministic
/// for a fixed sample order. `Clone` (via `Emitter::clone_box`) lets
/// `Simulator::reset` snapshot this variant along with the others.
#[derive(Clone)]
pub struct Emitters {
    emitters: Vec<Box<dyn Emitter>>,
    parallel: bool,
}

impl Emitters {
    pub fn new(emitters: Vec<Box<dyn Emitter>>, parallel: bool) -> Self {
        Self { emitters, parallel }
    }
}

impl Sample for Emitters {
    fn response(&mut self, time: f64, dt: f64, source: &AnySource) -> Result<SampleResponse> {
        if self.parallel {
            use rayon::prelude::*;
            self.emitters
                .par_iter_mut()
                .map(|emitter| emitter.response(time, dt, source))
                .collect()
        } else {
            self.emitters
                .iter_mut()
                .map(|emitter| emitter.response(time, dt, source))
                .collect()
        }
    }
}

//! A simulator for fluorescence microscope image formation.
//!
//! The engine is a directed pipeline executed once per time step: a
//! [`Source`](source::Source) supplies irradiance as a function of position;
//! a [`Sample`](sample::Sample) turns that irradiance into per-emitter photon
//! counts, driving any stochastic emitters through a continuous-time Markov
//! [`StateMachine`](state_machine::StateMachine); [`Optics`](optics::Optics)
//! spreads those photons across an image plane through a point-spread
//! function with integer photon conservation; and a
//! [`Detector`](detector::Detector) turns the resulting photon image into a
//! quantized sensor frame through a shot-noise/read-noise/gain/saturation
//! chain. [`Simulator`](simulator::Simulator) owns the clock and drives the
//! whole pipeline, one step (or a whole run) at a time.

pub mod config;
pub mod detector;
pub mod emitter;
pub mod error;
pub mod optics;
pub mod psf;
pub mod rng;
pub mod sample;
pub mod simulator;
pub mod source;
pub mod state_machine;

pub use config::StateMachineCacheConfig;
pub use detector::{AduImage, AnyDetector, BitDepth, Detector, SimpleCmosCamera};
pub use emitter::{Emitter, EmitterResponse, Fluorophore};
pub use error::{Error, Result};
pub use optics::{AnyOptics, Optics, PhotonImage, SimpleMicroscope};
pub use psf::{AnyPsf, Gaussian2D, Psf};
pub use rng::{RandomDraws, SimRng};
pub use sample::{AnySample, ConstantEmitters, Emitters, NullSample, Sample, SampleResponse};
pub use simulator::{FrameStack, Processor, Simulator, StepResponse};
pub use source::{AnySource, Source, UniformMono2D};
pub use state_machine::{Event, StateMachine};

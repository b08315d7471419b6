//! Simulator: the driver that owns the clock and runs the pipeline.

use crate::detector::{AduImage, AnyDetector, Detector};
use crate::error::{Error, Result};
use crate::optics::{AnyOptics, Optics, PhotonImage};
use crate::rng::RandomDraws;
use crate::sample::{AnySample, Sample, SampleResponse};
use crate::source::AnySource;

/// The bundle of per-component outputs produced by one [`Simulator::step`].
#[derive(Debug, Clone)]
pub struct StepResponse {
    pub sample_response: SampleResponse,
    pub optics_response: PhotonImage,
    pub detector_response: AduImage,
}

/// Invoked around each step for side effects; may inspect but not own the
/// simulator. Preprocessors see `step_response = None`;
/// post-processors see the bundle `step` just produced. Must not mutate
/// the clock directly.
pub trait Processor<R: RandomDraws + Clone> {
    fn call(&mut self, simulator: &Simulator<R>, step_response: Option<&StepResponse>) -> Result<()>;
}

/// The construction-time state restored wholesale by [`Simulator::reset`].
///
/// Every owned field that can carry per-step mutable state is captured:
/// `time`, `source`, `sample`, `optics`, `detector`, and `rng`. `Sample`'s
/// `Emitters` variant is cloneable through `Emitter::clone_box`, so a
/// `Fluorophore`'s `StateMachine` (its state index and pending event) rolls
/// back along with everything else.
#[derive(Clone)]
struct Snapshot<R> {
    time: f64,
    source: AnySource,
    sample: AnySample,
    optics: AnyOptics,
    detector: AnyDetector,
    rng: R,
}

/// Drives the Source → Sample → Optics → Detector pipeline, one step at a
/// time, advancing a monotonic clock.
pub struct Simulator<R: RandomDraws + Clone> {
    source: AnySource,
    sample: AnySample,
    optics: AnyOptics,
    detector: AnyDetector,
    time: f64,
    dt: f64,
    x_lim: (i64, i64),
    y_lim: (i64, i64),
    num_measurements: usize,
    preprocessors: Vec<Box<dyn Processor<R>>>,
    postprocessors: Vec<Box<dyn Processor<R>>>,
    rng: R,
    snapshot: Option<Snapshot<R>>,
}

impl<R: RandomDraws + Clone> Simulator<R> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: AnySource,
        sample: AnySample,
        optics: AnyOptics,
        detector: AnyDetector,
        dt: f64,
        x_lim: (i64, i64),
        y_lim: (i64, i64),
        num_measurements: usize,
        rng: R,
        backup: bool,
    ) -> Result<Self> {
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

        let snapshot = backup.then(|| Snapshot {
            time: 0.0,
            source: source.clone(),
            sample: sample.clone(),
            optics: optics.clone(),
            detector: detector.clone(),
            rng: rng.clone(),
        });

        Ok(Self {
            source,
            sample,
            optics,
            detector,
            time: 0.0,
            dt,
            x_lim,
            y_lim,
            num_measurements,
            preprocessors: Vec::new(),
            postprocessors: Vec::new(),
            rng,
            snapshot,
        })
    }

    pub fn add_preprocessor(&mut self, processor: Box<dyn Processor<R>>) {
        self.preprocessors.push(processor);
    }

    pub fn add_postprocessor(&mut self, processor: Box<dyn Processor<R>>) {
        self.postprocessors.push(processor);
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Runs one pipeline step: preprocessors, sample, optics, detector,
    /// clock advance, post-processors.
    pub fn step(&mut self) -> Result<StepResponse> {
        log::trace!("simulator step at time={:.6} dt={:.6}", self.time, self.dt);

        let mut preprocessors = std::mem::take(&mut self.preprocessors);
        for processor in &mut preprocessors {
            processor.call(self, None)?;
        }
        self.preprocessors = preprocessors;

        let sample_response = self.sample.response(self.time, self.dt, &self.source)?;
        let optics_response = self
            .optics
            .response(self.x_lim, self.y_lim, &sample_response)?;
        let detector_response = self.detector.response(Some(&optics_response), &mut self.rng)?;

        self.time += self.dt;

        let response = StepResponse {
            sample_response,
            optics_response,
            detector_response,
        };

        let mut postprocessors = std::mem::take(&mut self.postprocessors);
        for processor in &mut postprocessors {
            processor.call(self, Some(&response))?;
        }
        self.postprocessors = postprocessors;

        Ok(response)
    }

    /// Runs `num_measurements` steps, stacking each detector frame into a
    /// `(num_measurements, height, width)` array, optionally resetting
    /// afterward.
    pub fn run(&mut self, reset: bool) -> Result<FrameStack> {
        let mut frames = Vec::with_capacity(self.num_measurements);
        let mut height = 0;
        let mut width = 0;
        for _ in 0..self.num_measurements {
            let response = self.step()?;
            height = response.detector_response.height;
            width = response.detector_response.width;
            frames.push(response.detector_response.data);
        }
        if reset {
            self.reset()?;
        }
        Ok(FrameStack {
            num_measurements: frames.len(),
            height,
            width,
            frames,
        })
    }

    /// Restores the snapshot taken at construction: clock, source, sample,
    /// optics, detector, and RNG. Fails with `StateInvalidated` if `backup`
    /// was not enabled.
    pub fn reset(&mut self) -> Result<()> {
        let Some(snapshot) = self.snapshot.clone() else {
            return Err(Error::state_invalidated(
                "reset called on a simulator built without backup",
            ));
        };
        self.time = snapshot.time;
        self.source = snapshot.source;
        self.sample = snapshot.sample;
        self.optics = snapshot.optics;
        self.detector = snapshot.detector;
        self.rng = snapshot.rng;
        Ok(())
    }
}

/// A stack of `num_measurements` detector frames.
#[derive(Debug, Clone)]
pub struct FrameStack {
    pub num_measurements: usize,
    pub height: usize,
    pub width: usize,
    pub frames: Vec<Vec<u32>>,
}

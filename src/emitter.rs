//! Emitters: the objects a [`crate::sample::Sample`] is made of.

use crate::error::{Error, Result};
use crate::rng::RandomDraws;
use crate::source::Source;
use crate::state_machine::StateMachine;

/// What an emitter contributes to a single exposure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmitterResponse {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub photons: u64,
    pub wavelength: f64,
}

impl EmitterResponse {
    pub fn new(x: f64, y: f64, z: f64, photons: u64, wavelength: f64) -> Result<Self> {
        if wavelength <= 0.0 {
            return Err(Error::invalid_argument("wavelength must be greater than 0"));
        }
        Ok(Self {
            x,
            y,
            z,
            photons,
            wavelength,
        })
    }
}

/// An object in a sample that responds to illumination by emitting photons.
///
/// Unlike [`crate::source::Source`] and [`crate::psf::Psf`], this is left an
/// open trait rather than an `enum_dispatch` union: the point of
/// `Sample::Emitters` is to hold a heterogeneous collection of emitter kinds
/// behind one vtable, so new emitter physics can be added without touching
/// the sample machinery. `clone_box` gives `Box<dyn Emitter>` a cloning path
/// (the standard `dyn-clone` idiom) so a `Sample::Emitters` can be snapshotted
/// by `Simulator::reset`.
pub trait Emitter: Send + Sync {
    fn response(&mut self, time: f64, dt: f64, source: &dyn Source) -> Result<EmitterResponse>;

    fn clone_box(&self) -> Box<dyn Emitter>;
}

impl Clone for Box<dyn Emitter> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// A point fluorophore driven by a photophysical [`StateMachine`].
///
/// Only one of its states is fluorescent (`fluorescence_state`); the photon
/// rate while occupying it follows the saturating two-level formula
/// `R(I) = q * sigma * I / (1 + I / I_sat)`, with
/// `I_sat = 1 / (sigma * q * tau)`.
#[derive(Debug, Clone)]
pub struct Fluorophore<R> {
    x: f64,
    y: f64,
    z: f64,
    cross_section: f64,
    fluorescence_lifetime: f64,
    quantum_yield: f64,
    wavelength: f64,
    fluorescence_state: usize,
    state_machine: StateMachine<R>,
}

impl<R: RandomDraws> Fluorophore<R> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        x: f64,
        y: f64,
        z: f64,
        cross_section: f64,
        fluorescence_lifetime: f64,
        quantum_yield: f64,
        wavelength: f64,
        fluorescence_state: usize,
        state_machine: StateMachine<R>,
    ) -> Result<Self> {
        if cross_section <= 0.0 {
            return Err(Error::invalid_argument("cross_section must be greater than 0"));
        }
        if fluorescence_lifetime <= 0.0 {
            return Err(Error::invalid_argument(
                "fluorescence_lifetime must be greater than 0",
            ));
        }
        if !(0.0 < quantum_yield && quantum_yield <= 1.0) {
            return Err(Error::invalid_argument(
                "quantum_yield must be in the interval (0, 1]",
            ));
        }
        if wavelength <= 0.0 {
            return Err(Error::invalid_argument("wavelength must be greater than 0"));
        }
        if fluorescence_state >= state_machine.num_states() {
            return Err(Error::invalid_argument(
                "fluorescence_state must be a valid state of the state machine",
            ));
        }
        Ok(Self {
            x,
            y,
            z,
            cross_section,
            fluorescence_lifetime,
            quantum_yield,
            wavelength,
            fluorescence_state,
            state_machine,
        })
    }

    fn saturation_irradiance(&self) -> f64 {
        1.0 / (self.cross_section * self.quantum_yield * self.fluorescence_lifetime)
    }

    fn photon_rate(&self, irradiance: f64) -> f64 {
        let i_sat = self.saturation_irradiance();
        self.quantum_yield * self.cross_section * irradiance / (1.0 + irradiance / i_sat)
    }

    fn on_fraction(&self, events: &[crate::state_machine::Event], time: f64, dt: f64) -> f64 {
        if events.is_empty() {
            return if self.state_machine.current_state() == self.fluorescence_state {
                1.0
            } else {
                0.0
            };
        }

        let mut on_time = 0.0;
        let mut previous_time = time;
        for event in events {
            if event.from_state == self.fluorescence_state {
                on_time += event.time - previous_time;
            }
            previous_time = event.time;
        }
        let last = events.last().expect("events is non-empty");
        if last.to_state == self.fluorescence_state {
            on_time += (time + dt) - last.time;
        }
        on_time / dt
    }

    /// The on-fraction/saturating-rate algorithm itself, independent of the
    /// [`Emitter`] trait so it stays callable without the `Clone + Send +
    /// Sync + 'static` bounds that trait needs only for boxing into a
    /// heterogeneous `Sample::Emitters` collection.
    pub fn response(&mut self, time: f64, dt: f64, source: &dyn Source) -> Result<EmitterResponse> {
        let irradiance = source.irradiance(self.x, self.y);
        let events = self
            .state_machine
            .collect(&[irradiance], time, dt)?;
        let on_fraction = self.on_fraction(&events, time, dt);
        let rate = self.photon_rate(irradiance);
        let photons = (on_fraction * rate * dt).max(0.0).round() as u64;
        EmitterResponse::new(self.x, self.y, self.z, photons, self.wavelength)
    }
}

impl<R: RandomDraws + Clone + Send + Sync + 'static> Emitter for Fluorophore<R> {
    fn response(&mut self, time: f64, dt: f64, source: &dyn Source) -> Result<EmitterResponse> {
        Fluorophore::response(self, time, dt, source)
    }

    fn clone_box(&self) -> Box<dyn Emitter> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::MockRandomDraws;
    use crate::source::UniformMono2D;

    fn always_on_state_machine(rng: MockRandomDraws) -> StateMachine<MockRandomDraws> {
        // A single-state machine: no transitions, the fluorophore spends the
        // entire window in its only (fluorescent) state.
        StateMachine::new(0, vec![], vec![vec![0.0]], vec![], rng).unwrap()
    }

    #[test]
    fn fluorophore_rejects_non_positive_cross_section() {
        let rng = MockRandomDraws::new();
        let sm = always_on_state_machine(rng);
        assert!(Fluorophore::new(0.0, 0.0, 0.0, 0.0, 1.0, 0.5, 500.0, 0, sm).is_err());
    }

    #[test]
    fn fluorophore_rejects_quantum_yield_out_of_range() {
        let rng = MockRandomDraws::new();
        let sm = always_on_state_machine(rng);
        assert!(Fluorophore::new(0.0, 0.0, 0.0, 1.0, 1.0, 1.5, 500.0, 0, sm).is_err());
    }

    #[test]
    fn fluorophore_rejects_fluorescence_state_out_of_range() {
        let rng = MockRandomDraws::new();
        let sm = always_on_state_machine(rng);
        assert!(Fluorophore::new(0.0, 0.0, 0.0, 1.0, 1.0, 0.5, 500.0, 1, sm).is_err());
    }

    #[test]
    fn response_with_no_transitions_uses_full_dt() {
        let rng = MockRandomDraws::new();
        let sm = always_on_state_machine(rng);
        let mut fluorophore =
            Fluorophore::new(16.0, 16.0, 0.0, 1.0, 1e-3, 0.5, 500.0, 0, sm).unwrap();
        let source = UniformMono2D::new(1e6, 1e5, (0.0, 32.0), (0.0, 32.0)).unwrap();

        let response = fluorophore.response(0.0, 1.0, &source).unwrap();
        let irradiance = source.irradiance(16.0, 16.0);
        let expected_rate = 0.5 * 1.0 * irradiance / (1.0 + irradiance / (1.0 / (1.0 * 0.5 * 1e-3)));
        assert_eq!(response.photons, expected_rate.round() as u64);
        assert_eq!(response.x, 16.0);
        assert_eq!(response.wavelength, 500.0);
    }

    #[test]
    fn response_outside_the_source_rectangle_emits_no_photons() {
        let rng = MockRandomDraws::new();
        let sm = always_on_state_machine(rng);
        let mut fluorophore =
            Fluorophore::new(-10.0, -10.0, 0.0, 1.0, 1e-3, 0.5, 500.0, 0, sm).unwrap();
        let source = UniformMono2D::new(1e6, 1e5, (0.0, 32.0), (0.0, 32.0)).unwrap();

        let response = fluorophore.response(0.0, 1.0, &source).unwrap();
        assert_eq!(response.photons, 0);
    }
}

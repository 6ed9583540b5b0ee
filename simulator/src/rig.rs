//! The virtual scanning rig.
//!
//! [`VirtualRig::build`] wires RAM-backed peripherals into the firmware's
//! [`Scanner`], so the exact sequencing code that ships on the board runs
//! here against a [`Scene`] instead of motors and optics. The axes move
//! step counters, the sensor ranges the scene from the counters.

use std::{
    convert::Infallible,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use embedded_hal::delay::DelayNs;
use firmware::axis::{Axis, Direction};
use firmware::scanner::Scanner;
use firmware::sensor::{RangeReading, RangeSensor};
use firmware::settings::NvMemory;
use rand::{distributions::Distribution, rngs::StdRng, SeedableRng};
use serde::Deserialize;
use statrs::distribution::Normal;

use crate::scene::Scene;

/// Physical properties of the simulated hardware.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    /// Turntable microsteps per full revolution.
    pub steps_per_rev: u16,

    /// Lift microsteps per millimeter of carriage travel.
    pub z_steps_per_mm: u16,

    /// Distance (in cm) from the sensor to the rotation axis.
    pub center_distance_cm: f32,

    /// Measurements past this distance (in cm) read as out of range.
    pub sensor_max_cm: f32,

    /// Standard deviation (in cm) of the gaussian measurement noise.
    /// Zero gives a noise-free sensor.
    pub noise_std_cm: f32,

    /// Noise seed, fixed so a run can be reproduced.
    pub seed: u64,

    /// Wall-clock speedup applied to the firmware's delays. 1.0 paces the
    /// scan like the real rig, zero or less skips the delays entirely.
    pub time_scale: f32,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            steps_per_rev: 1600,
            z_steps_per_mm: 200,
            center_distance_cm: 15.0,
            sensor_max_cm: 120.0,
            noise_std_cm: 0.0,
            seed: 0,
            time_scale: 1.0,
        }
    }
}

/// Step counters shared between the axes and the sensor.
#[derive(Default)]
struct RigState {
    theta_steps: i64,
    z_steps: i64,
}

impl RigState {
    fn theta_rad(&self, steps_per_rev: u16) -> f32 {
        let wrapped = self.theta_steps.rem_euclid(i64::from(steps_per_rev));
        wrapped as f32 / f32::from(steps_per_rev) * std::f32::consts::TAU
    }

    fn z_mm(&self, z_steps_per_mm: u16) -> f32 {
        self.z_steps as f32 / f32::from(z_steps_per_mm)
    }
}

enum AxisKind {
    Rotation,
    Lift,
}

/// One of the two stepper axes, moving the shared counters.
pub struct RigAxis {
    state: Arc<Mutex<RigState>>,
    kind: AxisKind,
}

impl Axis for RigAxis {
    type Error = Infallible;

    fn step(&mut self, direction: Direction, count: u32) -> Result<(), Infallible> {
        let delta = match direction {
            Direction::Forward => i64::from(count),
            Direction::Reverse => -i64::from(count),
        };
        let mut state = self.state.lock().unwrap();
        match self.kind {
            AxisKind::Rotation => state.theta_steps += delta,
            // the carriage stalls against the bottom end stop
            AxisKind::Lift => state.z_steps = (state.z_steps + delta).max(0),
        }
        Ok(())
    }
}

/// Ranges the scene from wherever the axes currently point.
pub struct RigSensor {
    state: Arc<Mutex<RigState>>,
    scene: Arc<Scene>,
    config: RigConfig,
    noise: Option<Normal>,
    rng: StdRng,
}

impl RangeSensor for RigSensor {
    type Error = Infallible;

    fn init(&mut self) -> Result<(), Infallible> {
        Ok(())
    }

    fn read(&mut self) -> Result<RangeReading, Infallible> {
        let (theta_rad, z_mm) = {
            let state = self.state.lock().unwrap();
            (
                state.theta_rad(self.config.steps_per_rev),
                state.z_mm(self.config.z_steps_per_mm),
            )
        };

        let Some(radius_cm) = self.scene.radius_at(theta_rad, z_mm) else {
            // nothing on the table at this height, only the far wall
            return Ok(RangeReading::OutOfRange);
        };

        let mut distance_cm = self.config.center_distance_cm - radius_cm;
        if let Some(noise) = &self.noise {
            distance_cm += noise.sample(&mut self.rng) as f32;
        }
        if distance_cm <= 0.0 {
            // surface at or behind the lens, no usable return
            return Ok(RangeReading::Nothing);
        }
        if distance_cm > self.config.sensor_max_cm {
            return Ok(RangeReading::OutOfRange);
        }
        Ok(RangeReading::Valid((distance_cm * 10.0).round() as u16))
    }
}

/// RAM-backed settings image. Blank at every boot, so the virtual rig wakes
/// up with the default parameters until the host configures it.
#[derive(Clone)]
pub struct RigNv {
    bytes: Arc<Mutex<[u8; 64]>>,
}

impl Default for RigNv {
    fn default() -> Self {
        Self {
            bytes: Arc::new(Mutex::new([0; 64])),
        }
    }
}

impl NvMemory for RigNv {
    fn read_byte(&mut self, address: u16) -> u8 {
        self.bytes.lock().unwrap()[usize::from(address)]
    }

    fn write_byte(&mut self, address: u16, value: u8) {
        self.bytes.lock().unwrap()[usize::from(address)] = value;
    }
}

/// Scales the firmware's settle and pacing delays down to simulation time.
pub struct RigDelay {
    time_scale: f32,
}

impl DelayNs for RigDelay {
    fn delay_ns(&mut self, ns: u32) {
        if self.time_scale > 0.0 {
            thread::sleep(Duration::from_secs_f64(
                f64::from(ns) / 1e9 / f64::from(self.time_scale),
            ));
        }
    }
}

/// The firmware front-end assembled around the virtual peripherals.
pub type RigScanner = Scanner<RigAxis, RigAxis, RigSensor, RigNv, RigDelay>;

/// Inspection handle on the simulated hardware, kept by the node while the
/// firmware thread owns the peripherals themselves.
pub struct VirtualRig {
    state: Arc<Mutex<RigState>>,
    config: RigConfig,
}

impl VirtualRig {
    pub fn build(config: RigConfig, scene: Scene) -> (VirtualRig, RigScanner) {
        let state = Arc::new(Mutex::new(RigState::default()));

        let rotation = RigAxis {
            state: state.clone(),
            kind: AxisKind::Rotation,
        };
        let lift = RigAxis {
            state: state.clone(),
            kind: AxisKind::Lift,
        };
        let noise = (config.noise_std_cm > 0.0)
            .then(|| Normal::new(0.0, f64::from(config.noise_std_cm)))
            .and_then(Result::ok);
        let sensor = RigSensor {
            state: state.clone(),
            scene: Arc::new(scene),
            config,
            noise,
            rng: StdRng::seed_from_u64(config.seed),
        };
        let scanner = Scanner::new(
            rotation,
            lift,
            sensor,
            RigNv::default(),
            RigDelay {
                time_scale: config.time_scale,
            },
        );

        (VirtualRig { state, config }, scanner)
    }

    /// Current turntable angle in degrees.
    pub fn theta_deg(&self) -> f32 {
        self.state
            .lock()
            .unwrap()
            .theta_rad(self.config.steps_per_rev)
            .to_degrees()
    }

    /// Current carriage height above home in millimeters.
    pub fn z_mm(&self) -> f32 {
        self.state.lock().unwrap().z_mm(self.config.z_steps_per_mm)
    }
}

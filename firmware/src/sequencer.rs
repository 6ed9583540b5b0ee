//! Scan sequencing.
//!
//! Pure bookkeeping for a running scan: which slot comes next, when to
//! change layers, when the scan is done. Motion and measurements happen in
//! [`crate::scanner`]; the sequencer plans one advance at a time and is told
//! afterwards that it happened.

use scanrs_message::{LiftDirection, ScanParams};

/// Returned when an operation needs the rig to be idle.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Busy;

/// How a running scan is paced.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// The host requests every advance with `SCAN_STEP`.
    HostStepped,
    /// The device advances itself, one slot per poll.
    FreeRunning,
}

/// Position within a scan.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
    /// 0-based layer.
    pub layer: u32,
    /// Next slot to measure. `theta_steps_per_rev` means the revolution is
    /// complete and the next advance changes layers.
    pub step: u16,
    /// Which way the carriage moves between layers.
    pub direction: LiftDirection,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning {
        progress: ScanProgress,
        pacing: Pacing,
    },
    Paused {
        progress: ScanProgress,
    },
}

/// One planned advance. The caller performs the motion and measurement and
/// reports back with [`Sequencer::commit`].
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SlotPlan {
    /// Rotate into the slot, settle, measure, report the point.
    MeasurePoint {
        rotate_steps: u16,
        layer: u32,
        slot: u16,
        angle_deg: f32,
    },
    /// Revolution done: move the carriage one layer and emit the marker.
    NextLayer {
        lift_steps: u16,
        direction: LiftDirection,
        finished_layer: u32,
    },
    /// All layers measured.
    Finished,
}

/// What `RESUME` has to do before the scan continues.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePlan {
    /// Position the carriage at the top first. Set when nothing has been
    /// measured yet, in which case the resume is a fresh top-down pass.
    pub move_to_top_first: bool,
    pub progress: ScanProgress,
}

pub struct Sequencer {
    params: ScanParams,
    state: ScanState,
    /// Turntable position counter modulo `theta_steps_per_rev`. Scan slots
    /// advance it by one, manual jogs add their raw step count.
    theta_step: u16,
}

impl Sequencer {
    pub fn new(params: ScanParams) -> Self {
        Self {
            params,
            state: ScanState::Idle,
            theta_step: 0,
        }
    }

    pub fn params(&self) -> &ScanParams {
        &self.params
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Angle of the turntable position counter, reported by `TEST_POINT`.
    pub fn theta_angle_deg(&self) -> f32 {
        if self.params.theta_steps_per_rev == 0 {
            return 0.0;
        }
        f32::from(self.theta_step % self.params.theta_steps_per_rev)
            * self.params.angle_per_slot_deg()
    }

    /// Move the turntable position counter, wrapping modulo the slot count.
    pub fn offset_theta(&mut self, steps: i32) {
        let theta = i32::from(self.params.theta_steps_per_rev);
        if theta == 0 {
            return;
        }
        let current = i32::from(self.theta_step);
        self.theta_step = (current + steps).rem_euclid(theta) as u16;
    }

    /// Replace the parameters. The geometry is locked once a scan has
    /// measured anything, until it completes.
    pub fn set_params(&mut self, params: ScanParams) -> Result<(), Busy> {
        match self.state {
            ScanState::Idle => {}
            // nothing measured yet, a resume starts over anyway
            ScanState::Paused { progress } if progress.layer == 0 && progress.step == 0 => {}
            _ => return Err(Busy),
        }
        self.params = params;
        Ok(())
    }

    /// Begin a fresh host-stepped scan, restarting from zero even when a
    /// scan is already running.
    pub fn start(&mut self, direction: LiftDirection) {
        self.theta_step = 0;
        self.state = ScanState::Scanning {
            progress: ScanProgress {
                layer: 0,
                step: 0,
                direction,
            },
            pacing: Pacing::HostStepped,
        };
    }

    /// Pause, remembering where the scan stood. Pausing an idle rig latches
    /// zero progress.
    pub fn stop(&mut self) -> ScanProgress {
        let progress = match self.state {
            ScanState::Scanning { progress, .. } | ScanState::Paused { progress } => progress,
            ScanState::Idle => ScanProgress {
                layer: 0,
                step: 0,
                direction: LiftDirection::Down,
            },
        };
        self.state = ScanState::Paused { progress };
        progress
    }

    /// Continue a paused scan free-running. `None` when nothing is paused.
    pub fn resume(&mut self) -> Option<ResumePlan> {
        let ScanState::Paused { mut progress } = self.state else {
            return None;
        };
        let fresh = progress.layer == 0 && progress.step == 0;
        if fresh {
            // a fresh pass starts at the top and works its way down
            progress.direction = LiftDirection::Down;
        }
        self.state = ScanState::Scanning {
            progress,
            pacing: Pacing::FreeRunning,
        };
        Some(ResumePlan {
            move_to_top_first: fresh,
            progress,
        })
    }

    /// The next advance of a running scan. `None` while idle or paused.
    pub fn next_slot(&self) -> Option<SlotPlan> {
        let ScanState::Scanning { progress, .. } = self.state else {
            return None;
        };
        Some(self.plan_for(progress))
    }

    fn plan_for(&self, progress: ScanProgress) -> SlotPlan {
        if progress.step >= self.params.theta_steps_per_rev {
            let finished_layer = progress.layer;
            if finished_layer + 1 >= self.params.layers() {
                return SlotPlan::Finished;
            }
            return SlotPlan::NextLayer {
                lift_steps: self.params.z_steps_per_layer,
                direction: progress.direction,
                finished_layer,
            };
        }
        SlotPlan::MeasurePoint {
            rotate_steps: self.params.steps_for_slot(progress.step),
            layer: progress.layer,
            slot: progress.step,
            angle_deg: self.params.slot_angle_deg(progress.step),
        }
    }

    /// Record that a planned advance happened. Points bump the slot and the
    /// position counter, layer changes rewind the slot, `Finished` returns
    /// the sequencer to idle.
    pub fn commit(&mut self, plan: SlotPlan) {
        let ScanState::Scanning {
            mut progress,
            pacing,
        } = self.state
        else {
            return;
        };
        match plan {
            SlotPlan::MeasurePoint { .. } => {
                progress.step += 1;
                self.offset_theta(1);
            }
            SlotPlan::NextLayer { .. } => {
                progress.step = 0;
                progress.layer += 1;
            }
            SlotPlan::Finished => {
                self.state = ScanState::Idle;
                return;
            }
        }
        self.state = ScanState::Scanning { progress, pacing };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_params() -> ScanParams {
        // 2 layers of 4 slots, 10 microsteps per revolution
        ScanParams {
            theta_steps_per_rev: 4,
            z_travel_mm: 2,
            z_steps_per_mm: 1,
            z_steps_per_layer: 1,
            steps_per_rev: 10,
            ..Default::default()
        }
    }

    #[test]
    fn a_host_stepped_scan_walks_slots_then_layers() {
        let params = small_params();
        assert_eq!(params.layers(), 2);
        let mut seq = Sequencer::new(params);
        seq.start(LiftDirection::Up);

        for layer in 0u32..2 {
            for slot in 0u16..4 {
                let plan = seq.next_slot().unwrap();
                assert_eq!(
                    plan,
                    SlotPlan::MeasurePoint {
                        // 10 steps over 4 slots: the first two move 3
                        rotate_steps: if slot < 2 { 3 } else { 2 },
                        layer,
                        slot,
                        angle_deg: f32::from((slot + 1) % 4) * 90.0,
                    }
                );
                seq.commit(plan);
            }
            let plan = seq.next_slot().unwrap();
            if layer == 0 {
                assert_eq!(
                    plan,
                    SlotPlan::NextLayer {
                        lift_steps: 1,
                        direction: LiftDirection::Up,
                        finished_layer: 0,
                    }
                );
            } else {
                assert_eq!(plan, SlotPlan::Finished);
            }
            seq.commit(plan);
        }
        assert_eq!(seq.state(), ScanState::Idle);
    }

    #[test]
    fn stop_and_resume_reenter_mid_scan() {
        let mut seq = Sequencer::new(small_params());
        seq.start(LiftDirection::Up);
        let plan = seq.next_slot().unwrap();
        seq.commit(plan);

        let progress = seq.stop();
        assert_eq!((progress.layer, progress.step), (0, 1));
        assert_eq!(seq.next_slot(), None);

        let resume = seq.resume().unwrap();
        assert!(!resume.move_to_top_first);
        // a mid-scan resume keeps the direction the scan started with
        assert_eq!(resume.progress.direction, LiftDirection::Up);
        assert!(matches!(
            seq.next_slot().unwrap(),
            SlotPlan::MeasurePoint { slot: 1, .. }
        ));
    }

    #[test]
    fn an_idle_stop_resumes_as_a_fresh_downward_pass() {
        let mut seq = Sequencer::new(small_params());
        let progress = seq.stop();
        assert_eq!((progress.layer, progress.step), (0, 0));

        let resume = seq.resume().unwrap();
        assert!(resume.move_to_top_first);
        assert_eq!(resume.progress.direction, LiftDirection::Down);
    }

    #[test]
    fn resume_without_a_pause_is_ignored() {
        let mut seq = Sequencer::new(small_params());
        assert!(seq.resume().is_none());
        seq.start(LiftDirection::Up);
        assert!(seq.resume().is_none());
    }

    #[test]
    fn pausing_on_a_layer_boundary_resumes_at_the_layer_move() {
        let mut seq = Sequencer::new(small_params());
        seq.start(LiftDirection::Down);
        for _ in 0..4 {
            let plan = seq.next_slot().unwrap();
            seq.commit(plan);
        }

        let progress = seq.stop();
        assert_eq!((progress.layer, progress.step), (0, 4));

        seq.resume().unwrap();
        assert!(matches!(
            seq.next_slot().unwrap(),
            SlotPlan::NextLayer {
                finished_layer: 0,
                ..
            }
        ));
    }

    #[test]
    fn params_are_locked_once_a_scan_measured_anything() {
        let mut seq = Sequencer::new(small_params());
        seq.start(LiftDirection::Up);
        assert_eq!(seq.set_params(small_params()), Err(Busy));

        let plan = seq.next_slot().unwrap();
        seq.commit(plan);
        seq.stop();
        assert_eq!(seq.set_params(small_params()), Err(Busy));
    }

    #[test]
    fn params_may_change_while_nothing_is_measured() {
        let mut seq = Sequencer::new(small_params());
        seq.set_params(ScanParams::default()).unwrap();

        // an idle stop latches zero progress and keeps config open
        seq.stop();
        seq.set_params(small_params()).unwrap();
    }

    #[test]
    fn the_position_counter_tracks_slots_and_jogs() {
        let params = ScanParams {
            theta_steps_per_rev: 8,
            steps_per_rev: 1600,
            ..Default::default()
        };
        let mut seq = Sequencer::new(params);
        seq.offset_theta(3);
        assert_eq!(seq.theta_angle_deg(), 135.0);
        seq.offset_theta(-5);
        // wraps modulo the slot count
        assert_eq!(seq.theta_angle_deg(), 270.0);

        seq.start(LiftDirection::Up);
        assert_eq!(seq.theta_angle_deg(), 0.0);
        let plan = seq.next_slot().unwrap();
        seq.commit(plan);
        assert_eq!(seq.theta_angle_deg(), 45.0);
    }

    #[test]
    fn start_restarts_even_mid_scan() {
        let mut seq = Sequencer::new(small_params());
        seq.start(LiftDirection::Up);
        for _ in 0..3 {
            let plan = seq.next_slot().unwrap();
            seq.commit(plan);
        }

        seq.start(LiftDirection::Down);
        match seq.state() {
            ScanState::Scanning { progress, pacing } => {
                assert_eq!((progress.layer, progress.step), (0, 0));
                assert_eq!(progress.direction, LiftDirection::Down);
                assert_eq!(pacing, Pacing::HostStepped);
            }
            other => panic!("unexpected state {other:?}"),
        }
    }
}

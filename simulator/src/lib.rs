//! A virtual scanning rig behind the real link stack.
//!
//! The simulator runs the actual firmware crate against software
//! peripherals: a [`scene::Scene`] stands in for the object on the
//! turntable, a loopback wire for the serial cable. Everything downstream
//! of the connection behaves exactly as it does against real hardware,
//! which makes this the test bench for the whole pipeline.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use common::node::{Node, NodeConfig};
use link::{ConnectionHandle, ConnectionNode, Transport};
use scanrs_message::ScanParams;
use serde::Deserialize;
use tracing::info;

use loopback::{loopback, FirmwareRx, FirmwareTx};
use rig::{RigConfig, RigScanner, VirtualRig};
use scene::{Scene, Shape};

mod loopback;
mod rig;
mod scene;

/// Cadence of the virtual main loop. Long enough to stay off the CPU while
/// idle, short enough that command turnaround feels instant.
const POLL_INTERVAL: Duration = Duration::from_micros(200);

pub struct SimulatorNode {
    link: ConnectionNode,
    firmware: Option<FirmwareThreadHandle>,
    rig: VirtualRig,
}

#[derive(Clone, Deserialize)]
pub struct SimulatorNodeConfig {
    topic_point: String,
    topic_event: String,
    topic_command: String,

    /// Objects on the turntable.
    #[serde(default)]
    scene: Vec<Shape>,

    #[serde(default)]
    rig: RigConfig,

    /// Scan parameters pushed over the link right after boot.
    #[serde(default)]
    config: Option<ScanParams>,
}

impl NodeConfig for SimulatorNodeConfig {
    fn instantiate(&self, pubsub: &mut pubsub::PubSub) -> Box<dyn Node> {
        let (rig, scanner) = VirtualRig::build(self.rig, Scene::new(self.scene.clone()));
        let (fw_rx, fw_tx, host) = loopback();

        let firmware = FirmwareThreadHandle::new(scanner, fw_rx, fw_tx);
        let handle = ConnectionHandle::spawn(
            move || Ok(Box::new(host) as Box<dyn Transport>),
            pubsub.publish(&self.topic_point),
            pubsub.publish(&self.topic_event),
            self.config,
        );

        Box::new(SimulatorNode {
            link: ConnectionNode::new(handle, pubsub.subscribe(&self.topic_command)),
            firmware: Some(firmware),
            rig,
        })
    }
}

impl Node for SimulatorNode {
    fn update(&mut self) {
        self.link.update();
    }

    fn terminate(&mut self) {
        self.link.terminate();
        if let Some(firmware) = self.firmware.take() {
            firmware.stop();
        }
        info!(
            "virtual rig left at theta={:.1}deg z={:.1}mm",
            self.rig.theta_deg(),
            self.rig.z_mm()
        );
    }
}

impl Drop for SimulatorNode {
    fn drop(&mut self) {
        if let Some(firmware) = &self.firmware {
            firmware.running.store(false, Ordering::Relaxed);
        }
    }
}

struct FirmwareThreadHandle {
    handle: JoinHandle<()>,
    running: Arc<AtomicBool>,
}

impl FirmwareThreadHandle {
    fn new(scanner: RigScanner, rx: FirmwareRx, tx: FirmwareTx) -> Self {
        let running = Arc::new(AtomicBool::new(true));

        let handle = thread::spawn({
            let running = running.clone();
            move || Self::thread(running, scanner, rx, tx)
        });

        FirmwareThreadHandle { handle, running }
    }

    fn thread(
        running: Arc<AtomicBool>,
        mut scanner: RigScanner,
        mut rx: FirmwareRx,
        mut tx: FirmwareTx,
    ) {
        info!("Firmware Thread Started");

        // the virtual peripherals cannot fail
        scanner.announce(&mut tx).unwrap();
        while running.load(Ordering::Relaxed) {
            scanner.poll(&mut rx, &mut tx).unwrap();
            thread::sleep(POLL_INTERVAL);
        }

        info!("Firmware Thread Ended");
    }

    fn stop(self) {
        self.running.store(false, Ordering::Relaxed);
        self.handle.join().unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cloud::{CloudBuilderNodeConfig, PointCloud};
    use common::{rig::RigGeometry, scan::ScanEvent};
    use link::ScanDriverNodeConfig;
    use pubsub::PubSub;
    use scanrs_message::{Command, LiftDirection};
    use std::time::Instant;

    fn small_params() -> ScanParams {
        ScanParams {
            theta_steps_per_rev: 4,
            z_travel_mm: 2,
            z_steps_per_mm: 1,
            z_steps_per_layer: 1,
            scan_delay_ms: 0,
            center_distance_cm: 15.0,
            steps_per_rev: 8,
        }
    }

    fn fast_rig() -> RigConfig {
        RigConfig {
            steps_per_rev: 8,
            z_steps_per_mm: 1,
            time_scale: 0.0,
            ..Default::default()
        }
    }

    fn sim_config(rig: RigConfig) -> SimulatorNodeConfig {
        SimulatorNodeConfig {
            topic_point: "scanner/point".into(),
            topic_event: "scanner/event".into(),
            topic_command: "scanner/command".into(),
            scene: vec![Shape::Cylinder {
                radius_cm: 5.0,
                height_mm: 10.0,
                base_mm: 0.0,
            }],
            rig,
            config: None,
        }
    }

    #[test]
    fn the_virtual_device_answers_over_the_loopback() {
        let mut pubsub = PubSub::new();
        let mut events = pubsub.subscribe::<ScanEvent>("scanner/event");
        let mut commands = pubsub.publish::<Command>("scanner/command");

        let mut node = sim_config(fast_rig()).instantiate(&mut pubsub);
        commands.publish(Arc::new(Command::ReadDistance));

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while !seen.contains(&ScanEvent::Info("LIDAR_DISTANCE:10.00".into())) {
            node.update();
            pubsub.tick();
            while let Some(event) = events.try_recv() {
                seen.push((*event).clone());
            }
            assert!(Instant::now() < deadline, "no reply, saw {seen:?}");
            thread::sleep(Duration::from_millis(1));
        }
        node.terminate();

        assert!(seen.contains(&ScanEvent::Info("3D Scanner Ready".into())));
        assert!(seen.contains(&ScanEvent::ConfigAccepted(ScanParams::default())));
    }

    #[test]
    fn a_driven_scan_fills_a_cloud_end_to_end() {
        let mut pubsub = PubSub::new();

        let driver = ScanDriverNodeConfig {
            topic_command: "scanner/command".into(),
            topic_point: "scanner/point".into(),
            topic_event: "scanner/event".into(),
            params: Some(small_params()),
            direction: LiftDirection::Up,
            point_timeout_ms: 2000,
        };
        let builder = CloudBuilderNodeConfig {
            topic_point: "scanner/point".into(),
            topic_event: "scanner/event".into(),
            topic_cloud: "cloud/finished".into(),
            geometry: RigGeometry::default(),
            output: None,
        };

        let mut clouds = pubsub.subscribe::<PointCloud>("cloud/finished");
        let mut nodes = vec![
            sim_config(fast_rig()).instantiate(&mut pubsub),
            driver.instantiate(&mut pubsub),
            builder.instantiate(&mut pubsub),
        ];

        let deadline = Instant::now() + Duration::from_secs(10);
        let finished = loop {
            for node in &mut nodes {
                node.update();
            }
            pubsub.tick();
            if let Some(cloud) = clouds.try_recv() {
                break cloud;
            }
            assert!(Instant::now() < deadline, "scan never completed");
            thread::sleep(Duration::from_millis(1));
        };
        for node in &mut nodes {
            node.terminate();
        }

        // 4 points per layer over 2 layers of the 5cm cylinder
        assert_eq!(finished.len(), 8);
        let mut layers = Vec::new();
        for point in finished.iter() {
            let radius_mm = (point.x_mm * point.x_mm + point.y_mm * point.y_mm).sqrt();
            assert_relative_eq!(radius_mm, 50.0, epsilon = 1e-3);
            assert_relative_eq!(point.z_mm, point.layer as f32, epsilon = 1e-3);
            layers.push(point.layer);
        }
        layers.dedup();
        assert_eq!(layers, [0, 1]);
    }
}

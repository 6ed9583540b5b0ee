use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    node::{Node, NodeConfig},
    scan::ScanEvent,
};
use pubsub::{PubSub, Publisher, Subscription};
use scanrs_message::{Command, LiftDirection, PointRecord, ScanParams};
use serde::Deserialize;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, Deserialize)]
pub struct ScanDriverNodeConfig {
    pub topic_command: String,
    pub topic_point: String,
    pub topic_event: String,
    /// Scan parameters sent before starting. Omit to scan with whatever the
    /// device has stored. The center distance travels with one decimal on the
    /// wire, give it at most one here or the echo will never match.
    #[serde(default)]
    pub params: Option<ScanParams>,
    #[serde(default = "default_direction")]
    pub direction: LiftDirection,
    /// How long to wait for the reply to one step before retrying.
    #[serde(default = "default_point_timeout_ms")]
    pub point_timeout_ms: u64,
}

fn default_direction() -> LiftDirection {
    LiftDirection::Up
}

fn default_point_timeout_ms() -> u64 {
    2000
}

impl NodeConfig for ScanDriverNodeConfig {
    fn instantiate(&self, pubsub: &mut PubSub) -> Box<dyn Node> {
        let mut pub_command = pubsub.publish(&self.topic_command);

        // push the session configuration right away, the start waits for the
        // device to echo it back
        if let Some(params) = self.params {
            pub_command.publish(Arc::new(Command::Configure(params)));
        }

        Box::new(ScanDriverNode {
            pub_command,
            pub_event: pubsub.publish(&self.topic_event),
            sub_point: pubsub.subscribe(&self.topic_point),
            sub_event: pubsub.subscribe(&self.topic_event),
            params: self.params,
            direction: self.direction,
            timeout: Duration::from_millis(self.point_timeout_ms),
            state: DriverState::WaitingForConfig,
            points_seen: 0,
        })
    }
}

enum DriverState {
    /// Waiting for the device to report a configuration, proof it is alive
    /// and set up the way this session wants.
    WaitingForConfig,
    /// `START_*` sent, waiting for the acknowledgement.
    Starting { sent_at: Instant, retried: bool },
    /// One or more `SCAN_STEP`s in flight.
    Stepping { sent_at: Instant, retried: bool },
    /// The device free-runs after a resume, nothing left to pace.
    Following,
    Paused,
    Done,
    Failed,
}

/// Paces a host-stepped scan: starts it once the device is configured, then
/// answers every measurement with the next `SCAN_STEP`. The measurement rate
/// is thereby bound by the host actually keeping up.
pub struct ScanDriverNode {
    pub_command: Publisher<Command>,
    pub_event: Publisher<ScanEvent>,
    sub_point: Subscription<PointRecord>,
    sub_event: Subscription<ScanEvent>,
    params: Option<ScanParams>,
    direction: LiftDirection,
    timeout: Duration,
    state: DriverState,
    points_seen: usize,
}

impl Node for ScanDriverNode {
    fn update(&mut self) {
        while let Some(event) = self.sub_event.try_recv() {
            self.handle_event(&event);
        }

        let mut replies = 0;
        while self.sub_point.try_recv().is_some() {
            self.points_seen += 1;
            replies += 1;
        }
        if matches!(self.state, DriverState::Stepping { .. }) {
            for _ in 0..replies {
                self.step();
            }
        }

        self.check_timeout();
    }
}

impl ScanDriverNode {
    fn handle_event(&mut self, event: &ScanEvent) {
        match event {
            ScanEvent::ConfigAccepted(reported) => {
                if matches!(self.state, DriverState::WaitingForConfig)
                    && self.config_matches(reported)
                {
                    self.start();
                }
            }
            ScanEvent::ConfigRejected(text) => {
                if matches!(self.state, DriverState::WaitingForConfig) {
                    warn!("cannot start, the device rejected the configuration: {text}");
                    self.state = DriverState::Failed;
                }
            }
            ScanEvent::Started => {
                if matches!(self.state, DriverState::Starting { .. }) {
                    self.step();
                }
            }
            ScanEvent::LayerFinished(layer) => {
                debug!("layer {layer} finished");
                if matches!(self.state, DriverState::Stepping { .. }) {
                    self.step();
                }
            }
            ScanEvent::Completed => {
                if !matches!(self.state, DriverState::WaitingForConfig) {
                    info!("scan finished after {} measurements", self.points_seen);
                    self.state = DriverState::Done;
                }
            }
            ScanEvent::Paused => {
                if matches!(
                    self.state,
                    DriverState::Starting { .. } | DriverState::Stepping { .. } | DriverState::Following
                ) {
                    info!("scan paused, pacing suspended");
                    self.state = DriverState::Paused;
                }
            }
            ScanEvent::Resumed => {
                // a resumed scan free-runs on the device side
                if !matches!(self.state, DriverState::Done | DriverState::Failed) {
                    info!("scan resumed, the device paces itself now");
                    self.state = DriverState::Following;
                }
            }
            ScanEvent::DeviceError(text) => warn!("device error: {text}"),
            _ => {}
        }
    }

    fn config_matches(&self, reported: &ScanParams) -> bool {
        match &self.params {
            None => true,
            Some(want) => want == reported,
        }
    }

    fn start(&mut self) {
        info!("starting scan, carriage direction {:?}", self.direction);
        self.points_seen = 0;
        self.pub_command.publish(Arc::new(Command::Start {
            direction: self.direction,
        }));
        self.state = DriverState::Starting {
            sent_at: Instant::now(),
            retried: false,
        };
    }

    fn step(&mut self) {
        self.pub_command.publish(Arc::new(Command::ScanStep));
        self.state = DriverState::Stepping {
            sent_at: Instant::now(),
            retried: false,
        };
    }

    fn check_timeout(&mut self) {
        let now = Instant::now();
        match &mut self.state {
            DriverState::Starting { sent_at, retried } => {
                if now.duration_since(*sent_at) >= self.timeout {
                    if *retried {
                        warn!("the device never acknowledged the start, giving up");
                        self.pub_event.publish(Arc::new(ScanEvent::DeviceError(
                            "start was not acknowledged".to_owned(),
                        )));
                        self.state = DriverState::Failed;
                    } else {
                        warn!("no start acknowledgement within {:?}, retrying", self.timeout);
                        *retried = true;
                        *sent_at = now;
                        self.pub_command.publish(Arc::new(Command::Start {
                            direction: self.direction,
                        }));
                    }
                }
            }
            DriverState::Stepping { sent_at, retried } => {
                if now.duration_since(*sent_at) >= self.timeout {
                    if *retried {
                        warn!("no measurement within {:?} after a retry, aborting", self.timeout);
                        self.pub_event.publish(Arc::new(ScanEvent::DeviceError(
                            "scan step timed out".to_owned(),
                        )));
                        self.state = DriverState::Failed;
                    } else {
                        warn!("no measurement within {:?}, retrying the step", self.timeout);
                        *retried = true;
                        *sent_at = now;
                        self.pub_command.publish(Arc::new(Command::ScanStep));
                    }
                }
            }
            _ => {}
        }
    }
}

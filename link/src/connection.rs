use std::{
    io,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc,
    },
    thread::{self, JoinHandle},
};

use common::{
    node::{Node, NodeConfig},
    scan::ScanEvent,
};
use pubsub::{PubSub, Publisher, Subscription};
use scanrs_message::{Command, PointRecord, Response, ScanParams, SERIAL_BAUD};
use serde::Deserialize;
use tracing::{info, warn};

use crate::transport::{open_serial, LineSplitter, Transport};

/// Splits the decoded response stream into the point topic and the event
/// topic. Lines that are not part of the protocol come out as `Info` events
/// so nothing the device says is lost.
pub(crate) struct Fanout {
    pub_point: Publisher<PointRecord>,
    pub_event: Publisher<ScanEvent>,
    layers_done: u32,
}

impl Fanout {
    pub(crate) fn new(pub_point: Publisher<PointRecord>, pub_event: Publisher<ScanEvent>) -> Self {
        Self {
            pub_point,
            pub_event,
            layers_done: 0,
        }
    }

    pub(crate) fn handle_line(&mut self, line: &str) {
        match Response::parse(line) {
            Ok(Response::Point(record)) => self.pub_point.publish(Arc::new(record)),
            Ok(Response::LayerMarker) => {
                // the marker carries no index, count revolutions since the
                // scan started
                let layer = self.layers_done;
                self.layers_done += 1;
                self.event(ScanEvent::LayerFinished(layer));
            }
            Ok(Response::ScanStart) => {
                self.layers_done = 0;
                self.event(ScanEvent::Started);
            }
            Ok(Response::ScanPaused) => self.event(ScanEvent::Paused),
            Ok(Response::ScanResumed) => self.event(ScanEvent::Resumed),
            Ok(Response::ScanComplete) => self.event(ScanEvent::Completed),
            Ok(Response::HomeComplete) => self.event(ScanEvent::HomeComplete),
            Ok(Response::MoveToTopComplete) => self.event(ScanEvent::MoveToTopComplete),
            Ok(Response::ConfigOk(params)) | Ok(Response::CurrentConfig(params)) => {
                self.event(ScanEvent::ConfigAccepted(params))
            }
            Ok(Response::ConfigError(text)) => {
                self.event(ScanEvent::ConfigRejected(text.to_owned()))
            }
            Ok(Response::Error(text))
            | Ok(Response::RotateError(text))
            | Ok(Response::RotateLiftError(text)) => {
                self.event(ScanEvent::DeviceError(text.to_owned()))
            }
            Ok(Response::Info(text)) => self.event(ScanEvent::Info(text.to_owned())),
            // jog echoes, test replies and anything unparsed are diagnostics
            Ok(_) | Err(_) => self.event(ScanEvent::Info(line.to_owned())),
        }
    }

    fn event(&mut self, event: ScanEvent) {
        self.pub_event.publish(Arc::new(event));
    }
}

/// A running link thread. Owns the transport and keeps reading until stopped.
pub struct ConnectionHandle {
    #[allow(unused)] // We need to hold on to this but are actually never using it directly
    handle: JoinHandle<()>,
    running: Arc<AtomicBool>,
    sender: Sender<Command>,
}

impl ConnectionHandle {
    /// Spawns the link thread. `open` runs on the thread so a slow or failing
    /// transport never stalls the caller, errors end the thread and are
    /// logged.
    pub fn spawn<F>(
        open: F,
        pub_point: Publisher<PointRecord>,
        pub_event: Publisher<ScanEvent>,
        config: Option<ScanParams>,
    ) -> Self
    where
        F: FnOnce() -> anyhow::Result<Box<dyn Transport>> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let (sender, receiver) = mpsc::channel();

        let handle = thread::spawn({
            let running = running.clone();
            move || {
                let fanout = Fanout::new(pub_point, pub_event);
                if let Err(e) = open_and_stream(open, running.clone(), fanout, receiver, config) {
                    running.store(false, Ordering::Relaxed);
                    tracing::error!("{}", e);
                }
            }
        });

        Self {
            handle,
            running,
            sender,
        }
    }

    pub fn send(&self, command: Command) {
        self.sender.send(command).ok();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stop(self) {
        self.running.store(false, Ordering::Relaxed);
        self.handle.join().ok();
    }
}

fn open_and_stream<F>(
    open: F,
    running: Arc<AtomicBool>,
    mut fanout: Fanout,
    receiver: Receiver<Command>,
    config: Option<ScanParams>,
) -> anyhow::Result<()>
where
    F: FnOnce() -> anyhow::Result<Box<dyn Transport>>,
{
    let mut port = open()?;

    // learn the device's effective configuration, then override it when the
    // session brings its own
    send_command(&mut *port, &Command::GetConfig)?;
    if let Some(params) = config {
        send_command(&mut *port, &Command::Configure(params))?;
    }

    let mut splitter = LineSplitter::default();
    let mut buf = [0u8; 256];

    while running.load(Ordering::Relaxed) {
        while let Ok(command) = receiver.try_recv() {
            info!("Sending: {:?}", command);
            send_command(&mut *port, &command)?;
        }

        match port.read(&mut buf) {
            Ok(0) => anyhow::bail!("link closed by the other end"),
            Ok(n) => splitter.push(&buf[..n], |line| fanout.handle_line(line)),
            // skip TimedOut errors, they are how the read loop breathes
            Err(e)
                if e.kind() == io::ErrorKind::TimedOut
                    || e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e.into()),
        }
    }

    // doesn't really matter if this succeeds or not since the connection
    // might be broken already
    send_command(&mut *port, &Command::Stop).ok();

    Ok(())
}

fn send_command(port: &mut dyn Transport, command: &Command) -> anyhow::Result<()> {
    write!(port, "{command}\r\n")?;
    port.flush()?;
    Ok(())
}

/// Forwards the command topic into a [`ConnectionHandle`]. The simulator
/// reuses this with its loopback transport.
pub struct ConnectionNode {
    handle: Option<ConnectionHandle>,
    sub_command: Subscription<Command>,
}

impl ConnectionNode {
    pub fn new(handle: ConnectionHandle, sub_command: Subscription<Command>) -> Self {
        Self {
            handle: Some(handle),
            sub_command,
        }
    }
}

impl Node for ConnectionNode {
    fn update(&mut self) {
        while let Some(command) = self.sub_command.try_recv() {
            match &self.handle {
                Some(handle) => handle.send(*command),
                None => warn!("dropping {command:?}, the link is down"),
            }
        }

        if self.handle.as_ref().is_some_and(|h| !h.is_running()) {
            warn!("link thread ended, dropping the connection");
            if let Some(handle) = self.handle.take() {
                handle.stop();
            }
        }
    }

    fn terminate(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop();
        }
    }
}

impl Drop for ConnectionNode {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.running.store(false, Ordering::Relaxed);
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct SerialConnectionNodeConfig {
    /// Serial device, e.g. `/dev/ttyUSB0`.
    pub port: PathBuf,
    #[serde(default = "default_baud")]
    pub baud: u32,
    pub topic_point: String,
    pub topic_event: String,
    pub topic_command: String,
    /// Scan parameters pushed to the device right after connecting.
    #[serde(default)]
    pub config: Option<ScanParams>,
}

fn default_baud() -> u32 {
    SERIAL_BAUD
}

impl NodeConfig for SerialConnectionNodeConfig {
    fn instantiate(&self, pubsub: &mut PubSub) -> Box<dyn Node> {
        let pub_point = pubsub.publish(&self.topic_point);
        let pub_event = pubsub.publish(&self.topic_event);
        let sub_command = pubsub.subscribe(&self.topic_command);

        info!("connecting to {} at {} baud", self.port.display(), self.baud);

        let port = self.port.clone();
        let baud = self.baud;
        let handle = ConnectionHandle::spawn(
            move || Ok(Box::new(open_serial(&port, baud)?) as Box<dyn Transport>),
            pub_point,
            pub_event,
            self.config,
        );

        Box::new(ConnectionNode::new(handle, sub_command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        collections::VecDeque,
        sync::Mutex,
        time::{Duration, Instant},
    };

    #[test]
    fn decodes_the_wire_stream_into_topics() {
        let mut pubsub = PubSub::new();
        let mut fanout = Fanout::new(
            pubsub.publish("scanner/point"),
            pubsub.publish("scanner/event"),
        );
        let mut points = pubsub.subscribe::<PointRecord>("scanner/point");
        let mut events = pubsub.subscribe::<ScanEvent>("scanner/event");

        fanout.handle_line("SCAN_START");
        fanout.handle_line("0,0,12.50,0.0");
        fanout.handle_line("9999");
        fanout.handle_line("9999");
        fanout.handle_line("SCAN_COMPLETE");
        fanout.handle_line("SCAN_INFO: Stopped at layer=0, step=2");
        fanout.handle_line("booting...");
        pubsub.tick();

        let record = points.try_recv().unwrap();
        assert_eq!(record.layer, 0);
        assert_eq!(record.distance_cm, 12.5);

        assert_eq!(*events.try_recv().unwrap(), ScanEvent::Started);
        assert_eq!(*events.try_recv().unwrap(), ScanEvent::LayerFinished(0));
        assert_eq!(*events.try_recv().unwrap(), ScanEvent::LayerFinished(1));
        assert_eq!(*events.try_recv().unwrap(), ScanEvent::Completed);
        assert_eq!(
            *events.try_recv().unwrap(),
            ScanEvent::Info("Stopped at layer=0, step=2".into())
        );
        assert_eq!(
            *events.try_recv().unwrap(),
            ScanEvent::Info("booting...".into())
        );
        assert!(events.try_recv().is_none());
    }

    #[test]
    fn layer_numbering_restarts_with_the_scan() {
        let mut pubsub = PubSub::new();
        let mut fanout = Fanout::new(
            pubsub.publish("scanner/point"),
            pubsub.publish("scanner/event"),
        );
        let mut events = pubsub.subscribe::<ScanEvent>("scanner/event");

        fanout.handle_line("SCAN_START");
        fanout.handle_line("9999");
        fanout.handle_line("SCAN_START");
        fanout.handle_line("9999");
        pubsub.tick();

        assert_eq!(*events.try_recv().unwrap(), ScanEvent::Started);
        assert_eq!(*events.try_recv().unwrap(), ScanEvent::LayerFinished(0));
        assert_eq!(*events.try_recv().unwrap(), ScanEvent::Started);
        assert_eq!(*events.try_recv().unwrap(), ScanEvent::LayerFinished(0));
    }

    #[test]
    fn reported_configs_become_events() {
        let mut pubsub = PubSub::new();
        let mut fanout = Fanout::new(
            pubsub.publish("scanner/point"),
            pubsub.publish("scanner/event"),
        );
        let mut events = pubsub.subscribe::<ScanEvent>("scanner/event");

        fanout.handle_line("CURRENT_CONFIG:200,200,200,400,50,15.0,1600");
        pubsub.tick();

        assert_eq!(
            *events.try_recv().unwrap(),
            ScanEvent::ConfigAccepted(ScanParams::default())
        );
    }

    /// Feeds scripted read chunks and records everything written.
    struct ScriptedTransport {
        chunks: VecDeque<Vec<u8>>,
        writes: Arc<Mutex<Vec<u8>>>,
    }

    impl io::Read for ScriptedTransport {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None => {
                    // keep the loop from spinning hot like a real port would
                    thread::sleep(Duration::from_millis(1));
                    Err(io::Error::from(io::ErrorKind::TimedOut))
                }
            }
        }
    }

    impl io::Write for ScriptedTransport {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn the_link_thread_configures_forwards_and_stops() {
        let mut pubsub = PubSub::new();
        let mut events = pubsub.subscribe::<ScanEvent>("scanner/event");
        let writes = Arc::new(Mutex::new(Vec::new()));

        let handle = ConnectionHandle::spawn(
            {
                let writes = writes.clone();
                move || {
                    Ok(Box::new(ScriptedTransport {
                        chunks: VecDeque::from([b"3D Scanner Ready\r\n".to_vec()]),
                        writes,
                    }) as Box<dyn Transport>)
                }
            },
            pubsub.publish("scanner/point"),
            pubsub.publish("scanner/event"),
            Some(ScanParams::default()),
        );

        handle.send(Command::Rotate {
            steps: 100,
            ccw: false,
        });

        // wait until the thread has both greeted and forwarded the jog
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if String::from_utf8_lossy(&writes.lock().unwrap()).contains("ROTATE") {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        handle.stop();

        let written = String::from_utf8_lossy(&writes.lock().unwrap()).to_string();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(
            lines,
            [
                "GET_CONFIG",
                "CONFIG,200,200,200,400,50,15.0,1600",
                "ROTATE,100",
                "STOP"
            ]
        );

        pubsub.tick();
        assert_eq!(
            *events.try_recv().unwrap(),
            ScanEvent::Info("3D Scanner Ready".into())
        );
    }
}

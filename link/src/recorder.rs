use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
};

use common::{
    node::{Node, NodeConfig},
    scan::ScanEvent,
};
use pubsub::{PubSub, Subscription};
use scanrs_message::{PointRecord, Response};
use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize)]
pub struct RecorderNodeConfig {
    pub topic_point: String,
    pub topic_event: String,
    /// Session file, one wire line per record.
    pub path: PathBuf,
}

impl NodeConfig for RecorderNodeConfig {
    fn instantiate(&self, pubsub: &mut PubSub) -> Box<dyn Node> {
        Box::new(RecorderNode {
            sub_point: pubsub.subscribe(&self.topic_point),
            sub_event: pubsub.subscribe(&self.topic_event),
            path: self.path.clone(),
            out: None,
            failed: false,
        })
    }
}

/// Writes the session back out as the wire lines it came from, layer markers
/// included, so a scan can be replayed later without the hardware.
pub struct RecorderNode {
    sub_point: Subscription<PointRecord>,
    sub_event: Subscription<ScanEvent>,
    path: PathBuf,
    out: Option<BufWriter<File>>,
    failed: bool,
}

impl Node for RecorderNode {
    fn update(&mut self) {
        while let Some(event) = self.sub_event.try_recv() {
            // keep the file in wire order, points precede their markers
            if matches!(*event, ScanEvent::LayerFinished(_) | ScanEvent::Completed) {
                self.drain_points();
            }
            self.write_event(&event);
        }
        self.drain_points();
    }

    fn terminate(&mut self) {
        self.flush();
    }
}

impl RecorderNode {
    fn drain_points(&mut self) {
        while let Some(record) = self.sub_point.try_recv() {
            self.write_line(&*record);
        }
    }

    fn write_event(&mut self, event: &ScanEvent) {
        match event {
            ScanEvent::Started => self.write_line(Response::ScanStart),
            ScanEvent::Paused => self.write_line(Response::ScanPaused),
            ScanEvent::Resumed => self.write_line(Response::ScanResumed),
            ScanEvent::LayerFinished(_) => self.write_line(Response::LayerMarker),
            ScanEvent::Completed => {
                self.write_line(Response::ScanComplete);
                self.flush();
            }
            ScanEvent::HomeComplete => self.write_line(Response::HomeComplete),
            ScanEvent::MoveToTopComplete => self.write_line(Response::MoveToTopComplete),
            ScanEvent::ConfigAccepted(params) => {
                self.write_line(Response::CurrentConfig(*params))
            }
            ScanEvent::ConfigRejected(text) => self.write_line(Response::ConfigError(text)),
            ScanEvent::DeviceError(text) => self.write_line(Response::Error(text)),
            ScanEvent::Info(text) => self.write_line(Response::Info(text)),
        }
    }

    fn write_line<D: std::fmt::Display>(&mut self, line: D) {
        if self.failed {
            return;
        }

        if self.out.is_none() {
            match File::create(&self.path) {
                Ok(file) => {
                    info!("recording session to {}", self.path.display());
                    self.out = Some(BufWriter::new(file));
                }
                Err(e) => {
                    error!("cannot record to {}: {e}", self.path.display());
                    self.failed = true;
                    return;
                }
            }
        }

        if let Some(out) = &mut self.out {
            if let Err(e) = writeln!(out, "{line}") {
                error!("recording failed: {e}");
                self.failed = true;
            }
        }
    }

    fn flush(&mut self) {
        if let Some(out) = &mut self.out {
            if let Err(e) = out.flush() {
                error!("flushing the session file failed: {e}");
                self.failed = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn records_the_session_as_wire_lines() {
        let path = std::env::temp_dir().join(format!(
            "scanrs-recorder-test-{}.log",
            std::process::id()
        ));

        let mut pubsub = PubSub::new();
        let mut node = RecorderNodeConfig {
            topic_point: "scanner/point".into(),
            topic_event: "scanner/event".into(),
            path: path.clone(),
        }
        .instantiate(&mut pubsub);
        let mut points = pubsub.publish::<PointRecord>("scanner/point");
        let mut events = pubsub.publish::<ScanEvent>("scanner/event");

        events.publish(Arc::new(ScanEvent::Started));
        points.publish(Arc::new(PointRecord {
            layer: 0,
            step: 0,
            distance_cm: 12.5,
            angle_deg: 1.8,
        }));
        events.publish(Arc::new(ScanEvent::LayerFinished(0)));
        events.publish(Arc::new(ScanEvent::Completed));

        pubsub.tick();
        node.update();
        node.terminate();

        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            lines,
            ["SCAN_START", "0,0,12.50,1.8", "9999", "SCAN_COMPLETE"]
        );
    }
}

use std::{path::PathBuf, sync::Arc, time::Instant};

use common::{
    node::{Node, NodeConfig},
    rig::RigGeometry,
    scan::ScanEvent,
    PerfStats,
};
use pubsub::{PubSub, Publisher, Subscription};
use scanrs_message::PointRecord;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::{export, pointcloud::PointCloud, projector::Projector};

#[derive(Clone, Debug, Deserialize)]
pub struct CloudBuilderNodeConfig {
    pub topic_point: String,
    pub topic_event: String,
    pub topic_cloud: String,
    #[serde(default)]
    pub geometry: RigGeometry,
    /// Where to write the finished cloud, format picked by extension (.xyz or .csv).
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl NodeConfig for CloudBuilderNodeConfig {
    fn instantiate(&self, pubsub: &mut PubSub) -> Box<dyn Node> {
        Box::new(CloudBuilderNode {
            sub_point: pubsub.subscribe(&self.topic_point),
            sub_event: pubsub.subscribe(&self.topic_event),
            pub_cloud: pubsub.publish(&self.topic_cloud),
            projector: Projector::new(self.geometry),
            output: self.output.clone(),
            cloud: PointCloud::new(),
            rejected: 0,
            stats: PerfStats::new(),
        })
    }
}

/// Accumulates the measurement stream into a [`PointCloud`] and publishes the
/// finished cloud when the scan completes.
pub struct CloudBuilderNode {
    sub_point: Subscription<PointRecord>,
    sub_event: Subscription<ScanEvent>,
    pub_cloud: Publisher<PointCloud>,
    projector: Projector,
    output: Option<PathBuf>,
    cloud: PointCloud,
    rejected: usize,
    stats: PerfStats,
}

impl Node for CloudBuilderNode {
    fn update(&mut self) {
        while let Some(event) = self.sub_event.try_recv() {
            // points travel on their own topic, pull the ones that came
            // before this event so summaries and the finished cloud see them
            if matches!(
                *event,
                ScanEvent::LayerFinished(_) | ScanEvent::Completed
            ) {
                self.drain_points();
            }
            self.handle_event(&event);
        }
        self.drain_points();
    }

    fn terminate(&mut self) {
        // a completed scan already cleared the cloud, anything left is a
        // partial session worth salvaging
        if !self.cloud.is_empty() {
            info!("salvaging {} points from an unfinished scan", self.cloud.len());
            self.export();
        }
    }
}

impl CloudBuilderNode {
    fn drain_points(&mut self) {
        let mut batch = Vec::new();
        while let Some(record) = self.sub_point.try_recv() {
            let start = Instant::now();
            match self.projector.project(&record) {
                Some(point) => batch.push(point),
                None => self.rejected += 1,
            }
            self.stats.update(start.elapsed());
        }
        self.cloud.extend(&batch);
    }

    fn handle_event(&mut self, event: &ScanEvent) {
        match event {
            ScanEvent::Started => {
                if !self.cloud.is_empty() {
                    info!("new scan, clearing {} accumulated points", self.cloud.len());
                }
                self.cloud = PointCloud::new();
                self.rejected = 0;
                self.stats.reset();
            }
            ScanEvent::LayerFinished(layer) => match self.cloud.layer_summary(*layer) {
                Some(summary) => info!(
                    "layer {layer} done: {} points, mean radius {:.1}mm",
                    summary.points, summary.mean_radius_mm
                ),
                None => info!("layer {layer} done: nothing on the disk"),
            },
            ScanEvent::ConfigAccepted(params) => {
                self.projector.apply_params(params);
                let geometry = self.projector.geometry();
                info!(
                    "rig configured: center {:.1}cm, layer height {:.2}mm",
                    geometry.center_distance_cm, geometry.layer_height_mm
                );
            }
            ScanEvent::ConfigRejected(text) => warn!("device rejected configuration: {text}"),
            ScanEvent::DeviceError(text) => warn!("device error: {text}"),
            ScanEvent::Completed => self.finish(),
            ScanEvent::Paused => info!("scan paused"),
            ScanEvent::Resumed => info!("scan resumed"),
            ScanEvent::HomeComplete | ScanEvent::MoveToTopComplete => debug!("{event:?}"),
            ScanEvent::Info(text) => debug!("device: {text}"),
        }
    }

    fn finish(&mut self) {
        info!(
            "scan complete: {} points over {} layers, {} readings rejected, projection {}",
            self.cloud.len(),
            self.cloud.layer_count(),
            self.rejected,
            self.stats
        );
        if let Some((min, max)) = self.cloud.bounds() {
            info!(
                "bounds [{:.1}, {:.1}] x [{:.1}, {:.1}] x [{:.1}, {:.1}] mm",
                min.x, max.x, min.y, max.y, min.z, max.z
            );
        }

        self.export();

        let finished = std::mem::take(&mut self.cloud);
        self.pub_cloud.publish(Arc::new(finished));
    }

    fn export(&mut self) {
        let Some(path) = &self.output else {
            return;
        };
        match export::write_to_path(&self.cloud, path) {
            Ok(()) => info!("wrote {}", path.display()),
            Err(e) => error!("export failed: {e:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn wire(pubsub: &mut PubSub) -> Box<dyn Node> {
        CloudBuilderNodeConfig {
            topic_point: "scanner/point".into(),
            topic_event: "scanner/event".into(),
            topic_cloud: "cloud/finished".into(),
            geometry: RigGeometry::default(),
            output: None,
        }
        .instantiate(pubsub)
    }

    #[test]
    fn projects_the_stream_and_publishes_on_completion() {
        let mut pubsub = PubSub::new();
        let mut node = wire(&mut pubsub);
        let mut points = pubsub.publish::<PointRecord>("scanner/point");
        let mut events = pubsub.publish::<ScanEvent>("scanner/event");
        let mut finished = pubsub.subscribe::<PointCloud>("cloud/finished");

        events.publish(Arc::new(ScanEvent::Started));
        points.publish(Arc::new(PointRecord {
            layer: 0,
            step: 0,
            distance_cm: 12.0,
            angle_deg: 0.0,
        }));
        // dropout, must not reach the cloud
        points.publish(Arc::new(PointRecord {
            layer: 0,
            step: 1,
            distance_cm: 0.0,
            angle_deg: 90.0,
        }));
        events.publish(Arc::new(ScanEvent::LayerFinished(0)));
        events.publish(Arc::new(ScanEvent::Completed));

        pubsub.tick();
        node.update();
        pubsub.tick();

        let cloud = finished.try_recv().expect("finished cloud");
        assert_eq!(cloud.len(), 1);
        assert_relative_eq!(cloud.point(0).x_mm, 30.0);
    }

    #[test]
    fn a_reported_config_retargets_later_points() {
        let mut pubsub = PubSub::new();
        let mut node = wire(&mut pubsub);
        let mut points = pubsub.publish::<PointRecord>("scanner/point");
        let mut events = pubsub.publish::<ScanEvent>("scanner/event");
        let mut finished = pubsub.subscribe::<PointCloud>("cloud/finished");

        events.publish(Arc::new(ScanEvent::ConfigAccepted(
            scanrs_message::ScanParams {
                center_distance_cm: 20.0,
                ..Default::default()
            },
        )));
        pubsub.tick();
        node.update();

        points.publish(Arc::new(PointRecord {
            layer: 0,
            step: 0,
            distance_cm: 12.0,
            angle_deg: 0.0,
        }));
        events.publish(Arc::new(ScanEvent::Completed));
        pubsub.tick();
        node.update();
        pubsub.tick();

        let cloud = finished.try_recv().expect("finished cloud");
        assert_relative_eq!(cloud.point(0).x_mm, 80.0);
    }

    #[test]
    fn a_new_scan_clears_the_previous_session() {
        let mut pubsub = PubSub::new();
        let mut node = wire(&mut pubsub);
        let mut points = pubsub.publish::<PointRecord>("scanner/point");
        let mut events = pubsub.publish::<ScanEvent>("scanner/event");
        let mut finished = pubsub.subscribe::<PointCloud>("cloud/finished");

        points.publish(Arc::new(PointRecord {
            layer: 0,
            step: 0,
            distance_cm: 12.0,
            angle_deg: 0.0,
        }));
        pubsub.tick();
        node.update();

        events.publish(Arc::new(ScanEvent::Started));
        events.publish(Arc::new(ScanEvent::Completed));
        pubsub.tick();
        node.update();
        pubsub.tick();

        let cloud = finished.try_recv().expect("finished cloud");
        assert!(cloud.is_empty());
    }
}

use std::path::PathBuf;

use common::node::{Node, NodeConfig};
use pubsub::PubSub;
use serde::Deserialize;
use tracing::{error, info};

use crate::connection::Fanout;

#[derive(Clone, Debug, Deserialize)]
pub struct ReplayNodeConfig {
    pub topic_point: String,
    pub topic_event: String,
    /// Session file recorded earlier.
    pub path: PathBuf,
    /// Pace the replay by feeding only this many lines per console tick.
    /// Everything goes out in one tick when omitted.
    #[serde(default)]
    pub lines_per_update: Option<usize>,
}

impl NodeConfig for ReplayNodeConfig {
    fn instantiate(&self, pubsub: &mut PubSub) -> Box<dyn Node> {
        Box::new(ReplayNode {
            fanout: Fanout::new(
                pubsub.publish(&self.topic_point),
                pubsub.publish(&self.topic_event),
            ),
            path: self.path.clone(),
            lines_per_update: self.lines_per_update,
            lines: None,
            done: false,
        })
    }
}

/// Plays a recorded session back through the same decoder the live link
/// uses, so every downstream node behaves exactly as it would on hardware.
pub struct ReplayNode {
    fanout: Fanout,
    path: PathBuf,
    lines_per_update: Option<usize>,
    lines: Option<std::vec::IntoIter<String>>,
    done: bool,
}

impl Node for ReplayNode {
    fn update(&mut self) {
        if self.done {
            return;
        }

        if self.lines.is_none() {
            match std::fs::read_to_string(&self.path) {
                Ok(text) => {
                    let lines: Vec<String> = text.lines().map(str::to_owned).collect();
                    info!("replaying {} lines from {}", lines.len(), self.path.display());
                    self.lines = Some(lines.into_iter());
                }
                Err(e) => {
                    error!("cannot read {}: {e}", self.path.display());
                    self.done = true;
                    return;
                }
            }
        }

        let Some(lines) = &mut self.lines else { return };
        let budget = self.lines_per_update.unwrap_or(usize::MAX);
        for _ in 0..budget {
            match lines.next() {
                Some(line) => self.fanout.handle_line(&line),
                None => {
                    info!("replay finished");
                    self.done = true;
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::scan::ScanEvent;
    use scanrs_message::PointRecord;

    fn fixture(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "scanrs-replay-test-{}-{name}.log",
            std::process::id()
        ));
        std::fs::write(
            &path,
            "SCAN_START\n0,0,12.50,0.0\n0,1,12.40,180.0\n9999\nSCAN_COMPLETE\n",
        )
        .unwrap();
        path
    }

    #[test]
    fn replays_everything_in_one_tick_by_default() {
        let path = fixture("all");
        let mut pubsub = PubSub::new();
        let mut node = ReplayNodeConfig {
            topic_point: "scanner/point".into(),
            topic_event: "scanner/event".into(),
            path: path.clone(),
            lines_per_update: None,
        }
        .instantiate(&mut pubsub);
        let mut points = pubsub.subscribe::<PointRecord>("scanner/point");
        let mut events = pubsub.subscribe::<ScanEvent>("scanner/event");

        node.update();
        pubsub.tick();
        std::fs::remove_file(&path).ok();

        let mut point_count = 0;
        while points.try_recv().is_some() {
            point_count += 1;
        }
        assert_eq!(point_count, 2);

        assert_eq!(*events.try_recv().unwrap(), ScanEvent::Started);
        assert_eq!(*events.try_recv().unwrap(), ScanEvent::LayerFinished(0));
        assert_eq!(*events.try_recv().unwrap(), ScanEvent::Completed);
    }

    #[test]
    fn a_paced_replay_spreads_lines_over_ticks() {
        let path = fixture("paced");
        let mut pubsub = PubSub::new();
        let mut node = ReplayNodeConfig {
            topic_point: "scanner/point".into(),
            topic_event: "scanner/event".into(),
            path: path.clone(),
            lines_per_update: Some(2),
        }
        .instantiate(&mut pubsub);
        let mut points = pubsub.subscribe::<PointRecord>("scanner/point");

        node.update();
        pubsub.tick();
        let first = points.try_recv();
        assert_eq!(first.map(|p| p.step), Some(0));
        assert!(points.try_recv().is_none());

        node.update();
        node.update();
        pubsub.tick();
        std::fs::remove_file(&path).ok();
        assert_eq!(points.try_recv().map(|p| p.step), Some(1));
    }
}

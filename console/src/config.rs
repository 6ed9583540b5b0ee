use std::fs;

use anyhow::anyhow;
use cloud::CloudBuilderNodeConfig;
use common::node::{Node, NodeConfig};
use link::{
    RecorderNodeConfig, ReplayNodeConfig, ScanDriverNodeConfig, SerialConnectionNodeConfig,
};
use pubsub::PubSub;
use serde::Deserialize;
use simulator::SimulatorNodeConfig;

#[derive(Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,

    pub nodes: Vec<NodeEnum>,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Main loop period in milliseconds while the topics are quiet.
    pub tick_ms: u64,

    /// Leave once a finished cloud appears on `topic_finished`.
    pub exit_on_complete: bool,
    pub topic_finished: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tick_ms: 10,
            exit_on_complete: true,
            topic_finished: "cloud/finished".into(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub enum NodeEnum {
    Simulator(SimulatorNodeConfig),
    SerialConnection(SerialConnectionNodeConfig),
    ScanDriver(ScanDriverNodeConfig),
    CloudBuilder(CloudBuilderNodeConfig),
    Recorder(RecorderNodeConfig),
    Replay(ReplayNodeConfig),
}

impl NodeEnum {
    fn instantiate(&self, pubsub: &mut PubSub) -> Box<dyn Node> {
        use NodeEnum::*;
        match self {
            Simulator(c) => c.instantiate(pubsub),
            SerialConnection(c) => c.instantiate(pubsub),
            ScanDriver(c) => c.instantiate(pubsub),
            CloudBuilder(c) => c.instantiate(pubsub),
            Recorder(c) => c.instantiate(pubsub),
            Replay(c) => c.instantiate(pubsub),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        // read file contents
        let contents = fs::read_to_string(path)?;

        Self::from_contents(&contents)
    }

    pub fn from_contents(contents: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(contents).map_err(|e| anyhow!(e))
    }

    pub fn instantiate_nodes(&self, pubsub: &mut PubSub) -> Vec<Box<dyn Node>> {
        self.nodes
            .iter()
            .map(|config| config.instantiate(pubsub))
            .collect()
    }
}

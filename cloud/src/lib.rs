//! Point cloud accumulation for the scanner host. Subscribes to the decoded
//! measurement stream, projects polar samples into cartesian space and writes
//! the finished cloud to disk.

mod export;
mod node;
mod pointcloud;
mod projector;

pub use export::{write_csv, write_to_path, write_xyz};
pub use node::{CloudBuilderNode, CloudBuilderNodeConfig};
pub use pointcloud::{LayerSummary, PointCloud};
pub use projector::Projector;

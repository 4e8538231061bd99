pub mod archive;
pub mod dry_run;
pub mod influxdb;

pub use archive::SnapshotArchive;
pub use dry_run::DryRunSink;
pub use influxdb::{InfluxDbSink, InfluxDbTarget};

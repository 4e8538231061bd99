pub mod credentials;
pub mod measurement;
pub mod session;
pub mod snapshot;

pub use credentials::Credentials;
pub use measurement::{Measurement, Metric};
pub use session::Session;
pub use snapshot::PlantSnapshot;

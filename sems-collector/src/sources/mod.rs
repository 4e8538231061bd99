pub mod sems_portal;

pub use sems_portal::{SemsPortalSource, DEFAULT_LOGIN_URL};

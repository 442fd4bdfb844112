//! Terminal session ownership.
//!
//! [`SessionRegistry`] is the only holder of open device connections and
//! the only mutable state shared between background tasks.

pub mod flight;
pub mod registry;

pub use flight::{FlightGuard, SingleFlight};
pub use registry::{Session, SessionRegistry};

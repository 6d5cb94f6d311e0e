// Library interface for docktest
// Launch a container for a test, discover its published ports, and wait
// for the service inside to become reachable before the test talks to it

pub mod clock;
pub mod container;
pub mod errors;
pub mod host;
pub mod ports;

pub use container::Container;
pub use errors::{DocktestError, Result};
pub use ports::PortMap;

pub mod probe;
pub mod tracker;
pub mod types;

pub use probe::{ConnectivityProbe, HttpProbe};
pub use tracker::NetworkTracker;
pub use types::{ConnectivityChange, NetworkState};

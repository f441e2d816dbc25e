mod debounce;
mod monitor;

pub use monitor::ConnectivityMonitor;

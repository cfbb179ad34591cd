//! Local command relay for the vervids After Effects panel, plus the
//! panel-side clients that find (or start) the relay and the background API.

pub mod background;
pub mod bootstrap;
pub mod changes;
pub mod client;
pub mod config;
mod error_classification;
pub mod history;
pub mod liveness;
pub mod panel;
pub mod project_path;
pub mod relay;
pub mod shell;
pub mod state;

pub use config::{PanelConfig, RelayConfig};
pub use state::RelayState;

/// Install the `tracing` subscriber shared by both binaries.
///
/// `RUST_LOG` wins over `default_filter`. With the `tokio-console` feature the
/// console layer is installed instead.
pub fn init_tracing(default_filter: &str) {
    #[cfg(feature = "tokio-console")]
    {
        let _ = default_filter;
        console_subscriber::init();
    }

    #[cfg(not(feature = "tokio-console"))]
    {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    }
}

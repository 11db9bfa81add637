pub mod constants;
pub use constants::*;

pub mod fsutils;
pub mod tracing_telemetry;

/// Package description as advertised by the binaries.
#[macro_export]
macro_rules! package_description {
    () => {
        env!("CARGO_PKG_NAME")
    };
}

/// Print package name and version on startup.
#[macro_export]
macro_rules! print_package_info {
    () => {
        tracing::info!(
            "{} (version {})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        );
    };
}

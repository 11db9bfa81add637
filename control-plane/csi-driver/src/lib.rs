/// The CSI plugin's name.
pub const CSI_PLUGIN_NAME: &str = utils::CSI_PLUGIN_NAME;

/// The generated CSI protocol types.
pub mod csi {
    #![allow(clippy::all)]
    tonic::include_proto!("csi.v1");
}

/// Driver runtime configuration.
pub mod config;
/// Volume context passed from the controller to the node.
pub mod context;
/// Deterministic volume and snapshot identities.
pub mod ids;
/// Per-id operation serialization.
pub mod limiter;

pub mod capacity;
pub mod directory;
pub mod export;
pub mod qos;
pub mod quota;
pub mod rest;
pub mod snapshot;
pub mod svm;
pub mod volume;

pub use capacity::*;
pub use directory::*;
pub use export::*;
pub use qos::*;
pub use quota::*;
pub use rest::*;
pub use snapshot::*;
pub use svm::*;
pub use volume::*;

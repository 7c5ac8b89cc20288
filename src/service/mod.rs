//! The scheduling core's service layer: device allocation, worker pools,
//! job batching, streaming results, and the admission façade that ties
//! them together.

pub mod admission;
pub mod device;
pub mod engine;
pub mod job;
pub mod model;
pub mod queue;
pub mod services;
pub mod streaming;
pub mod worker;

pub use admission::Admission;
pub use device::DeviceRegistry;
pub use model::{DeviceKind, EngineKind, ModelInfo, ModelKey};
pub use services::Services;
pub use streaming::StreamingResult;

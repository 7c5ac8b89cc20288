//! Device registry and device planner.

pub mod planner;
pub mod registry;

pub use planner::{plan, DeviceSet, DeviceSpec, SlotPlan};
pub use registry::{AlwaysAvailable, DeviceId, DeviceRegistry, HolderId, MaxShared, MemoryProbe, Occupancy};

//! Status store shared by all devices.

mod store;

pub use store::{keys, MemoryStatusStore, StatusStore, StatusUpdate, StatusValue};

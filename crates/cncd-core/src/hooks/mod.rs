//! # Extension points
//!
//! Named points in the device engine where observers may run additional
//! logic without the engine depending on them:
//!
//! | Hook | Arguments | Return |
//! |---|---|---|
//! | `connect_done` | device | - |
//! | `disconnect_done` | device, cause | - |
//! | `gcode_open_hook` | device, filename | filename |
//! | `gcode_readline_hook` | device, line | line |
//! | `gcode_done_hook` | device | - |
//! | `rx_hook` | device, line | - |
//!
//! Observers implement [`DeviceObserver`] and are registered on a
//! [`HookRegistry`] that is handed to every device.

mod observer;
mod progress;
mod registry;

pub use observer::{DeviceObserver, ObserverHandle};
pub use progress::{Progress, ProgressObserver};
pub use registry::{HookRegistry, DEFAULT_MAX_FAILURES};

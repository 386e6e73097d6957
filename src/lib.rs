//! # SPIM Live Console Core
//!
//! Core library of the operator console for a light-sheet microscope. It streams frames from
//! cameras to a display, samples stage positions, and lets the operator edit device
//! properties, while keeping every hardware access serialized per device class.
//!
//! ## Crate Structure
//!
//! - **`config`**: Figment-based configuration (`ConsoleConfig`) from TOML and environment.
//! - **`error`**: The `ConsoleError` enum used across the crate.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`hardware`**: Capability traits, the instrument and acquisition models, and mock
//!   devices.
//! - **`locks`**: One async mutex per device class (`LockRegistry`).
//! - **`property`**: Device property bridge and acquisition metadata bridge.
//! - **`live`**: Background contexts: frame worker, stage poller, session controller and
//!   property service, plus the event channel to the display.
//! - **`sink`**: The presentation sink, the only owner of display state.
//! - **`controls`**: Live toggle and snapshot controls with cooldown.
//! - **`persist`**: Saving display entries as 16-bit TIFF files.
//! - **`console`**: `LiveConsole`, wiring everything together.

pub mod config;
pub mod console;
pub mod controls;
pub mod error;
pub mod hardware;
pub mod live;
pub mod locks;
pub mod logging;
pub mod persist;
pub mod property;
pub mod sink;

pub use config::ConsoleConfig;
pub use console::LiveConsole;
pub use error::{AppResult, ConsoleError};

//! blockbar - a clickable status line generator for i3bar and swaybar.
//!
//! Each block on the bar is backed by an external shell command. Blocks run
//! on their own schedule, the currently visible group is serialized to stdout
//! whenever one of its blocks changes, and click events read from stdin are
//! routed back to the block that was clicked.
//!
//! # Architecture
//!
//! - **BlockRuntime** - One block's state and update lifecycle
//! - **Group** - Ordered set of blocks shown as one screen
//! - **Navigator** - Which group is visible; named switches and submenus
//! - **Publisher** - Writes frames of the i3bar protocol
//! - **ClickReader** - Decodes the endless click-event array from stdin
//!
//! # Modules
//!
//! - [`block`] - Block definitions, click actions and the runtime
//! - [`group`] - Groups of blocks
//! - [`navigator`] - Visible group state machine
//! - [`publisher`] - Protocol output
//! - [`click`] - Click stream decoding
//! - [`config`] - Configuration file loading

// Library modules
pub mod block;
pub mod click;
pub mod config;
pub mod group;
pub mod navigator;
pub mod publisher;

pub mod constants;
pub mod process;
pub mod protocol;

// Re-export commonly used types
pub use block::{BlockDefinition, BlockRuntime, ClickHandler, IntervalPolicy, OnClickAction, Transformer};
pub use config::BarConfig;
pub use group::Group;
pub use navigator::{Layout, Navigator};
pub use protocol::{ClickEvent, Rendered};
pub use publisher::{CaptureSink, Publisher};

//! Application-wide constants for blockbar.
//!
//! Protocol literals and process timings live here so the rest of the crate
//! never spells them out twice.
//!
//! # Categories
//!
//! - **Protocol**: i3bar handshake and block markers
//! - **Navigation**: the synthesized submenu `back` block
//! - **Processes**: grace periods for persistent subprocesses

use std::time::Duration;

// ============================================================================
// Protocol
// ============================================================================

/// i3bar protocol version announced in the handshake header.
pub const PROTOCOL_VERSION: u32 = 1;

/// Text shown by a block whose last update failed.
pub const ERROR_TEXT: &str = "ERROR";

/// Property key that identifies a block in frames and click events.
pub const INSTANCE_KEY: &str = "instance";

/// Property key holding the main display text of a block.
pub const FULL_TEXT_KEY: &str = "full_text";

/// Optional display properties understood by the bar.
///
/// `instance` and `full_text` are always present and are not listed here.
pub const KNOWN_PROPERTIES: &[&str] = &[
    "short_text",
    "color",
    "background",
    "border",
    "border_top",
    "border_right",
    "border_left",
    "border_bottom",
    "min_width",
    "align",
    "urgent",
    "separator",
    "separator_block_width",
    "markup",
];

// ============================================================================
// Navigation
// ============================================================================

/// Instance key of the block appended to every submenu.
pub const BACK_INSTANCE: &str = "back";

/// Display text of the submenu `back` block.
pub const BACK_TEXT: &str = "BACK";

// ============================================================================
// Processes
// ============================================================================

/// Shell used to run block commands.
pub const SHELL: &str = "sh";

/// How long a persistent command may take to exit after closing its stdout.
///
/// Past this the process is sent SIGTERM.
pub const PERSIST_EXIT_GRACE: Duration = Duration::from_millis(500);

/// How long a terminated process gets before it is killed outright.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Read buffer size for the click stream.
pub const CLICK_READ_BUFFER: usize = 4096;

/// Largest click object the decoder buffers before giving up on it.
pub const CLICK_MAX_OBJECT: usize = 64 * 1024;

// ============================================================================
// Configuration
// ============================================================================

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "BLOCKBAR_CONFIG";

/// Environment variable redirecting logs to a file.
pub const LOG_FILE_ENV: &str = "BLOCKBAR_LOG_FILE";

/// Prefix for click fields exported to `update` commands.
pub const CLICK_ENV_PREFIX: &str = "BLOCK_";

//! Configuration loading.
//!
//! The bar is configured with a JSON file listing named groups of blocks.
//! Loading turns it into a validated [`Layout`] of [`BlockDefinition`]s.
//!
//! ```json
//! {
//!   "initial": "main",
//!   "groups": [
//!     { "name": "main", "blocks": [
//!       { "instance": "clock", "command": "date '+%H:%M'", "interval": 10 },
//!       { "instance": "power", "props": { "full_text": "P" },
//!         "on_click": { "switch_group": "power" } }
//!     ]},
//!     { "name": "power", "blocks": [
//!       { "instance": "lock", "props": { "full_text": "Lock" },
//!         "on_click": { "run": "xsecurelock", "switch_group": "main" } }
//!     ]}
//!   ]
//! }
//! ```
//!
//! # Location
//!
//! 1. `--config <PATH>` on the command line
//! 2. `BLOCKBAR_CONFIG` environment variable
//! 3. Default: `<config dir>/blockbar/config.json`
//!
//! A leading `~` is expanded in all of them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::block::{BlockDefinition, ClickHandler, IntervalPolicy, OnClickAction, Transformer};
use crate::constants::{CLICK_ENV_PREFIX, CONFIG_ENV};
use crate::navigator::Layout;
use crate::process;
use crate::protocol::Props;

/// Top level of the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BarConfig {
    /// Group shown at startup; defaults to the first group.
    #[serde(default)]
    pub initial: Option<String>,
    /// Named groups, in order.
    pub groups: Vec<GroupConfig>,
}

/// One named group.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    /// Name used by `switch_group`.
    pub name: String,
    /// Blocks in display order.
    #[serde(default)]
    pub blocks: Vec<BlockConfig>,
}

/// One block.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockConfig {
    /// Instance key, unique within the group.
    pub instance: String,
    /// Shell command producing the block's content.
    #[serde(default)]
    pub command: Option<String>,
    /// `"once"`, `"persist"` or a number of seconds.
    #[serde(default)]
    pub interval: Option<IntervalConfig>,
    /// How command output becomes display state.
    #[serde(default)]
    pub transform: TransformConfig,
    /// Static display properties.
    #[serde(default)]
    pub props: Props,
    /// Click behavior.
    #[serde(default)]
    pub on_click: Option<ClickConfig>,
}

/// Raw `interval` value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum IntervalConfig {
    /// Seconds between runs.
    Seconds(f64),
    /// `"once"` or `"persist"`.
    Keyword(String),
}

/// Output transform selection.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformConfig {
    /// Strip the trailing newline, show as `full_text`.
    #[default]
    Trim,
    /// Parse a JSON object of properties.
    Json,
    /// Substitute the output for `{}`.
    Template(String),
}

/// Raw `on_click` value.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ClickConfig {
    /// A command to run.
    Command(String),
    /// Several actions in order.
    Steps(Vec<ClickConfig>),
    /// An action object.
    Action(Box<ActionConfig>),
}

/// Action object. Present fields run in declaration order.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionConfig {
    /// Command to spawn.
    #[serde(default)]
    pub run: Option<String>,
    /// Command whose output, run through the block's transformer, updates
    /// the block. Click fields are exported as `BLOCK_*` variables.
    #[serde(default)]
    pub update: Option<String>,
    /// Blocks of a submenu to open.
    #[serde(default)]
    pub submenu: Option<Vec<BlockConfig>>,
    /// Close the current submenu.
    #[serde(default)]
    pub back: bool,
    /// Group to switch to.
    #[serde(default)]
    pub switch_group: Option<String>,
}

impl BarConfig {
    /// Resolves the config path from the CLI value, env var or default.
    pub fn resolve_path(cli: Option<&Path>) -> Result<PathBuf> {
        let raw = match cli {
            Some(path) => path.to_string_lossy().into_owned(),
            None => match std::env::var(CONFIG_ENV) {
                Ok(path) => path,
                Err(_) => {
                    return Ok(dirs::config_dir()
                        .context("Could not determine config directory")?
                        .join("blockbar")
                        .join("config.json"))
                }
            },
        };
        Ok(PathBuf::from(shellexpand::tilde(&raw).into_owned()))
    }

    /// Reads and parses a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Parses config JSON.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Converts to a validated layout.
    ///
    /// Switch targets that name no group are only warned about; clicking them
    /// is a logged no-op at runtime.
    pub fn into_layout(self) -> Result<Layout> {
        let names: Vec<String> = self.groups.iter().map(|g| g.name.clone()).collect();
        let mut groups = Vec::with_capacity(self.groups.len());
        for group in self.groups {
            let blocks = group
                .blocks
                .into_iter()
                .map(|block| block.into_definition(&names))
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("In group `{}`", group.name))?;
            groups.push((group.name, blocks));
        }
        Layout::new(groups, self.initial.as_deref())
    }
}

impl IntervalConfig {
    fn to_policy(&self, instance: &str) -> Result<IntervalPolicy> {
        match self {
            Self::Keyword(k) if k == "once" => Ok(IntervalPolicy::RunOnce),
            Self::Keyword(k) if k == "persist" => Ok(IntervalPolicy::Persistent),
            Self::Seconds(secs) if secs.is_finite() && *secs > 0.0 => {
                let period = Duration::try_from_secs_f64(*secs).with_context(|| {
                    format!("Interval of block `{}` is out of range, got {}", instance, secs)
                })?;
                Ok(IntervalPolicy::RepeatEvery(period))
            }
            Self::Seconds(secs) => bail!("Interval of block `{}` must be positive, got {}", instance, secs),
            Self::Keyword(other) => bail!("Unknown interval `{}` of block `{}`", other, instance),
        }
    }
}

impl TransformConfig {
    fn to_transformer(&self) -> Transformer {
        match self {
            Self::Trim => Transformer::trim(),
            Self::Json => Transformer::json(),
            Self::Template(template) => Transformer::template(template.clone()),
        }
    }
}

impl BlockConfig {
    fn into_definition(self, groups: &[String]) -> Result<BlockDefinition> {
        let interval = match &self.interval {
            Some(interval) => interval.to_policy(&self.instance)?,
            None => IntervalPolicy::RunOnce,
        };
        if self.command.is_none() && self.interval.is_some() {
            log::warn!("[config] Block `{}` has an interval but no command", self.instance);
        }
        let transformer = self.transform.to_transformer();
        let on_click = match self.on_click {
            Some(click) => click
                .into_action(&transformer, groups)
                .with_context(|| format!("In on_click of block `{}`", self.instance))?,
            None => OnClickAction::None,
        };
        Ok(BlockDefinition {
            instance: self.instance,
            command: self.command,
            transformer,
            interval,
            static_props: self.props,
            on_click,
        })
    }
}

impl ClickConfig {
    fn into_action(self, transformer: &Transformer, groups: &[String]) -> Result<OnClickAction> {
        match self {
            Self::Command(command) => Ok(OnClickAction::RunCommand(command)),
            Self::Steps(steps) => Ok(OnClickAction::Compound(
                steps
                    .into_iter()
                    .map(|step| step.into_action(transformer, groups))
                    .collect::<Result<_>>()?,
            )),
            Self::Action(action) => action.into_action(transformer, groups),
        }
    }
}

impl ActionConfig {
    fn into_action(self, transformer: &Transformer, groups: &[String]) -> Result<OnClickAction> {
        let mut steps = Vec::new();
        if let Some(command) = self.run {
            steps.push(OnClickAction::RunCommand(command));
        }
        if let Some(command) = self.update {
            steps.push(OnClickAction::Update(update_handler(command, transformer.clone())));
        }
        if let Some(blocks) = self.submenu {
            let blocks = blocks
                .into_iter()
                .map(|block| block.into_definition(groups))
                .collect::<Result<Vec<_>>>()
                .context("In submenu")?;
            steps.push(OnClickAction::PushSubmenu(blocks));
        }
        if self.back {
            steps.push(OnClickAction::PopSubmenu);
        }
        if let Some(key) = self.switch_group {
            if !groups.contains(&key) {
                log::warn!("[config] switch_group target `{}` is not a group", key);
            }
            steps.push(OnClickAction::SwitchGroup(key));
        }
        Ok(match steps.len() {
            0 => OnClickAction::None,
            1 => steps.remove(0),
            _ => OnClickAction::Compound(steps),
        })
    }
}

/// Click update that runs `command` with the click exported to its
/// environment and transforms its stdout.
fn update_handler(command: String, transformer: Transformer) -> ClickHandler {
    ClickHandler::new(move |event| {
        let env = event.env_pairs(CLICK_ENV_PREFIX);
        let out = process::run_captured_blocking(&command, &env)?;
        transformer.apply(&out)
    })
}

/// Summary of a layout for `--check`.
pub fn describe(layout: &Layout) -> Value {
    let groups: Vec<Value> = layout
        .names()
        .map(|name| {
            let blocks: Vec<&str> = layout
                .blocks(name)
                .unwrap_or_default()
                .iter()
                .map(|block| block.instance.as_str())
                .collect();
            serde_json::json!({ "name": name, "blocks": blocks })
        })
        .collect();
    serde_json::json!({ "initial": layout.initial(), "groups": groups })
}

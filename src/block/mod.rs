//! Block definitions and click actions.
//!
//! A [`BlockDefinition`] is the immutable description of one block, built
//! once from configuration. [`BlockRuntime`] is the live instance that runs
//! the command and holds the rendered properties.
//!
//! # Update modes
//!
//! - [`IntervalPolicy::RunOnce`] - run at startup, never again
//! - [`IntervalPolicy::RepeatEvery`] - poll on an independent timer
//! - [`IntervalPolicy::Persistent`] - one long-lived process, one update per
//!   output line

mod runtime;

pub use runtime::BlockRuntime;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::{Map, Value};

use crate::constants::{BACK_INSTANCE, BACK_TEXT, FULL_TEXT_KEY};
use crate::protocol::{ClickEvent, Props, Rendered};

/// How often a block's command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntervalPolicy {
    /// Run once during startup.
    #[default]
    RunOnce,
    /// Run, then sleep for the given duration, forever.
    RepeatEvery(Duration),
    /// Spawn once and update on every line of output.
    Persistent,
}

type TransformFn = dyn Fn(&str) -> Result<Rendered> + Send + Sync;

/// Converts raw command output into display state.
///
/// Cheap to clone; the function is shared.
#[derive(Clone)]
pub struct Transformer(Arc<TransformFn>);

impl Transformer {
    /// Wraps an arbitrary transform function.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str) -> Result<Rendered> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Strips trailing newlines and shows the rest as `full_text`.
    pub fn trim() -> Self {
        Self::new(|raw| Ok(Rendered::Text(chomp(raw).to_string())))
    }

    /// Parses the output as a JSON object of property overrides.
    pub fn json() -> Self {
        Self::new(|raw| match serde_json::from_str::<Value>(raw)? {
            Value::Object(props) => Ok(Rendered::Props(props)),
            other => Err(anyhow!("expected a JSON object, got `{}`", other)),
        })
    }

    /// Substitutes the trimmed output for every `{}` in `template`.
    pub fn template(template: impl Into<String>) -> Self {
        let template = template.into();
        Self::new(move |raw| Ok(Rendered::Text(template.replace("{}", chomp(raw)))))
    }

    /// Applies the transform.
    pub fn apply(&self, raw: &str) -> Result<Rendered> {
        (self.0)(raw)
    }
}

impl Default for Transformer {
    fn default() -> Self {
        Self::trim()
    }
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Transformer(..)")
    }
}

fn chomp(raw: &str) -> &str {
    raw.trim_end_matches(['\n', '\r'])
}

type ClickFn = dyn Fn(&ClickEvent) -> Result<Rendered> + Send + Sync;

/// Computes new block state from a click (the `Update` action).
///
/// Runs on tokio's blocking pool, so it may block.
#[derive(Clone)]
pub struct ClickHandler(Arc<ClickFn>);

impl ClickHandler {
    /// Wraps a click update function.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ClickEvent) -> Result<Rendered> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Calls the handler.
    pub fn call(&self, event: &ClickEvent) -> Result<Rendered> {
        (self.0)(event)
    }
}

impl fmt::Debug for ClickHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClickHandler(..)")
    }
}

/// What a click on a block does.
#[derive(Debug, Clone, Default)]
pub enum OnClickAction {
    /// Spawn a shell command, fire and forget.
    RunCommand(String),
    /// Update the block from the click.
    Update(ClickHandler),
    /// Make the named group visible.
    SwitchGroup(String),
    /// Open a submenu made of these blocks plus a `back` block.
    PushSubmenu(Vec<BlockDefinition>),
    /// Close the current submenu.
    PopSubmenu,
    /// Run each action in order.
    Compound(Vec<OnClickAction>),
    /// Do nothing.
    #[default]
    None,
}

impl OnClickAction {
    /// Flattens nested `Compound` actions into leaf steps, in order.
    ///
    /// `None` steps are skipped.
    pub fn steps(&self) -> Vec<&OnClickAction> {
        let mut steps = Vec::new();
        self.collect_steps(&mut steps);
        steps
    }

    fn collect_steps<'a>(&'a self, steps: &mut Vec<&'a OnClickAction>) {
        match self {
            Self::Compound(actions) => {
                for action in actions {
                    action.collect_steps(steps);
                }
            }
            Self::None => {}
            leaf => steps.push(leaf),
        }
    }
}

/// Immutable description of one block.
#[derive(Debug, Clone)]
pub struct BlockDefinition {
    /// Key identifying the block within its group.
    pub instance: String,
    /// Shell command producing the block's content, if any.
    pub command: Option<String>,
    /// Turns command output into display state.
    pub transformer: Transformer,
    /// When the command runs.
    pub interval: IntervalPolicy,
    /// Properties set before the first update.
    pub static_props: Props,
    /// Click behavior.
    pub on_click: OnClickAction,
}

impl BlockDefinition {
    /// Creates a static block with no command and no click action.
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            command: None,
            transformer: Transformer::default(),
            interval: IntervalPolicy::RunOnce,
            static_props: Map::new(),
            on_click: OnClickAction::None,
        }
    }

    /// Sets the command and its update policy.
    pub fn with_command(mut self, command: impl Into<String>, interval: IntervalPolicy) -> Self {
        self.command = Some(command.into());
        self.interval = interval;
        self
    }

    /// Sets the output transformer.
    pub fn with_transformer(mut self, transformer: Transformer) -> Self {
        self.transformer = transformer;
        self
    }

    /// Sets one static property.
    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.static_props.insert(key.into(), value.into());
        self
    }

    /// Sets the static `full_text`.
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_prop(FULL_TEXT_KEY, text.into())
    }

    /// Sets the click action.
    pub fn on_click(mut self, action: OnClickAction) -> Self {
        self.on_click = action;
        self
    }

    /// The `back` block appended to every submenu.
    pub fn back() -> Self {
        Self::new(BACK_INSTANCE)
            .with_text(BACK_TEXT)
            .on_click(OnClickAction::PopSubmenu)
    }
}

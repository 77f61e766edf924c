//! Live block state and update lifecycle.
//!
//! A [`BlockRuntime`] owns the rendered properties of one block and drives
//! its command according to the block's [`IntervalPolicy`]. After every
//! merge it notifies its [`Group`]; the navigator decides whether that
//! produces a frame.
//!
//! # Failures
//!
//! Nothing that goes wrong inside a block escapes it. A failed command run,
//! transformer call or click update sets `full_text` to `ERROR` and still
//! notifies. Polling blocks keep their schedule; a persistent block tears
//! down its process and stays in `ERROR`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use anyhow::{anyhow, Error, Result};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec};

use super::{BlockDefinition, IntervalPolicy, OnClickAction};
use crate::constants::{ERROR_TEXT, FULL_TEXT_KEY, INSTANCE_KEY, PERSIST_EXIT_GRACE};
use crate::group::Group;
use crate::navigator::Navigator;
use crate::process;
use crate::protocol::{is_known_property, ClickEvent, Props, Rendered};

/// Decides whether a static or merged property may be stored.
///
/// `instance` is fixed at construction and never overridden. Unknown keys
/// are kept but warned about.
fn admit(instance: &str, key: &str) -> bool {
    if key == INSTANCE_KEY {
        log::warn!("[{}] Ignoring override of `instance`", instance);
        return false;
    }
    if !is_known_property(key) {
        log::warn!("[{}] Unknown property `{}`", instance, key);
    }
    true
}

/// One running block.
#[derive(Debug)]
pub struct BlockRuntime {
    definition: BlockDefinition,
    props: Mutex<Props>,
    group: Weak<Group>,
}

impl BlockRuntime {
    /// Creates the runtime with properties seeded from the definition.
    ///
    /// Nothing runs until [`start`](Self::start).
    pub fn new(definition: BlockDefinition, group: Weak<Group>) -> Self {
        let mut props = Props::new();
        props.insert(INSTANCE_KEY.to_string(), Value::String(definition.instance.clone()));
        props.insert(FULL_TEXT_KEY.to_string(), Value::String(String::new()));
        for (key, value) in &definition.static_props {
            if admit(&definition.instance, key) {
                props.insert(key.clone(), value.clone());
            }
        }
        Self {
            definition,
            props: Mutex::new(props),
            group,
        }
    }

    /// The block's instance key.
    pub fn instance(&self) -> &str {
        &self.definition.instance
    }

    /// The definition this block was built from.
    pub fn definition(&self) -> &BlockDefinition {
        &self.definition
    }

    /// Copy of the current rendered properties.
    pub fn snapshot(&self) -> Props {
        self.props().clone()
    }

    /// Current `full_text`.
    pub fn full_text(&self) -> String {
        self.props()
            .get(FULL_TEXT_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    fn props(&self) -> MutexGuard<'_, Props> {
        self.props.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merges a transformer (or click update) result into the properties.
    pub fn merge(&self, rendered: Rendered) {
        let mut props = self.props();
        match rendered {
            Rendered::Text(text) => {
                props.insert(FULL_TEXT_KEY.to_string(), Value::String(text));
            }
            Rendered::Props(overrides) => {
                for (key, value) in overrides {
                    if admit(self.instance(), &key) {
                        props.insert(key, value);
                    }
                }
            }
        }
    }

    /// Records a failed update: logs it and shows `ERROR`.
    pub fn fail(&self, err: &Error) {
        log::warn!("[{}] Update failed: {:#}", self.instance(), err);
        self.props()
            .insert(FULL_TEXT_KEY.to_string(), Value::String(ERROR_TEXT.to_string()));
    }

    /// Merges `result` (or the failure) and notifies the group.
    fn apply(&self, result: Result<Rendered>) {
        match result {
            Ok(rendered) => self.merge(rendered),
            Err(err) => self.fail(&err),
        }
        self.notify();
    }

    /// Asks the owning group to publish this block's change.
    ///
    /// A block whose group was discarded (a popped submenu) has no one to
    /// tell, so the change stays local.
    pub fn notify(&self) {
        if let Some(group) = self.group.upgrade() {
            group.notify();
        }
    }

    fn navigator(&self) -> Option<Arc<Navigator>> {
        self.group.upgrade().and_then(|group| group.navigator())
    }

    /// Runs the command once: execute, transform, merge, notify.
    ///
    /// Blocks without a command are left as they are.
    pub async fn refresh(&self) {
        let Some(command) = &self.definition.command else {
            return;
        };
        let result = process::run_captured(command)
            .await
            .and_then(|out| self.definition.transformer.apply(&out));
        self.apply(result);
    }

    /// Starts the block according to its interval policy.
    ///
    /// `RunOnce` completes before this returns. The other policies get their
    /// own task, whose handle is returned; those tasks run until the process
    /// exits.
    pub async fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let command = self.definition.command.clone()?;
        match self.definition.interval {
            IntervalPolicy::RunOnce => {
                self.refresh().await;
                None
            }
            IntervalPolicy::RepeatEvery(period) => {
                let block = Arc::clone(self);
                Some(tokio::spawn(async move { block.poll(period).await }))
            }
            IntervalPolicy::Persistent => {
                let block = Arc::clone(self);
                Some(tokio::spawn(async move { block.stream(command).await }))
            }
        }
    }

    async fn poll(&self, period: Duration) {
        log::debug!("[{}] Polling every {:?}", self.instance(), period);
        loop {
            self.refresh().await;
            tokio::time::sleep(period).await;
        }
    }

    async fn stream(&self, command: String) {
        let mut child = match process::spawn_streaming(&command) {
            Ok(child) => child,
            Err(err) => {
                self.apply(Err(err));
                return;
            }
        };
        let Some(stdout) = child.stdout.take() else {
            self.apply(Err(anyhow!("`{}` has no stdout", command)));
            return;
        };
        log::debug!("[{}] Listening to `{}` (pid {:?})", self.instance(), command, child.id());

        let mut lines = FramedRead::new(stdout, LinesCodec::new());
        let mut failure = None;
        while let Some(line) = lines.next().await {
            let result = line
                .map_err(Error::from)
                .and_then(|line| self.definition.transformer.apply(&line));
            match result {
                Ok(rendered) => {
                    self.merge(rendered);
                    self.notify();
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        let exit = if failure.is_some() {
            process::stop(&mut child).await.map(|status| (status, true))
        } else {
            process::wait_or_stop(&mut child, PERSIST_EXIT_GRACE).await
        };
        let failure = failure.or_else(|| match exit {
            Ok((status, false)) if status.success() => None,
            Ok((_, true)) => Some(anyhow!("`{}` closed its output but kept running", command)),
            Ok((status, false)) => Some(anyhow!("`{}` exited with {}", command, status)),
            Err(err) => Some(err),
        });

        match failure {
            Some(err) => self.apply(Err(err)),
            None => log::info!("[{}] `{}` finished", self.instance(), command),
        }
    }

    /// Performs the block's click action.
    ///
    /// Steps of a compound action run in order; a failing step is logged and
    /// the rest still run.
    pub async fn on_click(&self, event: &ClickEvent) {
        for step in self.definition.on_click.steps() {
            if let Err(err) = self.perform(step, event).await {
                log::warn!("[{}] Click action failed: {:#}", self.instance(), err);
            }
        }
    }

    async fn perform(&self, action: &OnClickAction, event: &ClickEvent) -> Result<()> {
        match action {
            OnClickAction::RunCommand(command) => process::spawn_detached(command),
            OnClickAction::Update(handler) => {
                let handler = handler.clone();
                let event = event.clone();
                let result = tokio::task::spawn_blocking(move || handler.call(&event))
                    .await
                    .map_err(Error::from)
                    .and_then(|result| result);
                self.apply(result);
                Ok(())
            }
            OnClickAction::SwitchGroup(key) => {
                self.require_navigator()?.switch_to(key);
                Ok(())
            }
            OnClickAction::PushSubmenu(blocks) => {
                let key = format!("{}/submenu", self.instance());
                self.require_navigator()?.push(key, blocks.clone()).await;
                Ok(())
            }
            OnClickAction::PopSubmenu => {
                self.require_navigator()?.pop();
                Ok(())
            }
            OnClickAction::Compound(_) | OnClickAction::None => Ok(()),
        }
    }

    fn require_navigator(&self) -> Result<Arc<Navigator>> {
        self.navigator()
            .ok_or_else(|| anyhow!("block is no longer attached to a navigator"))
    }
}

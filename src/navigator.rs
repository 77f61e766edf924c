//! Visible-group state machine.
//!
//! The navigator is the single source of truth for which [`Group`] is on
//! screen. It supports two navigation styles at once:
//!
//! - **Named switch**: [`switch_to`](Navigator::switch_to) jumps to one of
//!   the groups from the [`Layout`]
//! - **Submenus**: [`push`](Navigator::push) builds a temporary group with a
//!   trailing `back` block and stacks the previous group;
//!   [`pop`](Navigator::pop) returns to it
//!
//! # Locking
//!
//! The current group, the submenu stack and the [`Publisher`] share one
//! mutex. Block notifications, transitions and draws all take it, so frames
//! never interleave and a transition is never seen half-applied. The lock is
//! never held across an await.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use anyhow::{bail, Result};
use tokio::task::JoinHandle;

use crate::block::{BlockDefinition, OnClickAction};
use crate::constants::BACK_INSTANCE;
use crate::group::Group;
use crate::protocol::ClickEvent;
use crate::publisher::Publisher;

/// Validated set of named groups plus the one shown first.
#[derive(Debug, Clone)]
pub struct Layout {
    groups: Vec<(String, Vec<BlockDefinition>)>,
    initial: usize,
}

impl Layout {
    /// Validates the groups.
    ///
    /// Requires at least one group, unique group names, unique instances
    /// within each group and each submenu, and an `initial` group that exists
    /// (defaults to the first group). Submenus may not define a `back` block
    /// of their own.
    pub fn new(groups: Vec<(String, Vec<BlockDefinition>)>, initial: Option<&str>) -> Result<Self> {
        if groups.is_empty() {
            bail!("No groups defined");
        }
        for (index, (name, blocks)) in groups.iter().enumerate() {
            if groups[..index].iter().any(|(other, _)| other == name) {
                bail!("Group `{}` is defined twice", name);
            }
            validate_blocks(name, blocks, false)?;
        }
        let initial = match initial {
            None => 0,
            Some(key) => match groups.iter().position(|(name, _)| name == key) {
                Some(index) => index,
                None => bail!("Initial group `{}` is not defined", key),
            },
        };
        Ok(Self { groups, initial })
    }

    /// Group names in definition order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(name, _)| name.as_str())
    }

    /// Name of the group shown at startup.
    pub fn initial(&self) -> &str {
        &self.groups[self.initial].0
    }

    /// Blocks of a named group.
    pub fn blocks(&self, name: &str) -> Option<&[BlockDefinition]> {
        self.groups
            .iter()
            .find(|(group, _)| group == name)
            .map(|(_, blocks)| blocks.as_slice())
    }
}

/// Checks instance uniqueness in `blocks` and, recursively, in every
/// submenu their click actions open.
fn validate_blocks(scope: &str, blocks: &[BlockDefinition], submenu: bool) -> Result<()> {
    for (position, block) in blocks.iter().enumerate() {
        if blocks[..position].iter().any(|b| b.instance == block.instance) {
            bail!("Block `{}` appears twice in `{}`", block.instance, scope);
        }
        if submenu && block.instance == BACK_INSTANCE {
            bail!("Block name `{}` is reserved in submenu `{}`", BACK_INSTANCE, scope);
        }
        for step in block.on_click.steps() {
            if let OnClickAction::PushSubmenu(items) = step {
                validate_blocks(&format!("{}/submenu", block.instance), items, true)?;
            }
        }
    }
    Ok(())
}

struct NavState {
    /// Named groups, in layout order.
    groups: Vec<Arc<Group>>,
    current: Arc<Group>,
    /// Groups hidden by submenu pushes, most recent last.
    stack: Vec<Arc<Group>>,
    publisher: Publisher,
}

impl NavState {
    fn draw(&mut self) {
        let frame = self.current.serialize();
        if let Err(err) = self.publisher.draw(&frame) {
            log::error!("[Navigator] Failed to draw `{}`: {:#}", self.current.key(), err);
        }
    }
}

/// Tracks and changes the visible group.
pub struct Navigator {
    state: Mutex<NavState>,
}

impl std::fmt::Debug for Navigator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Ok(state) = self.state.try_lock() else {
            return f.write_str("Navigator { <locked> }");
        };
        f.debug_struct("Navigator")
            .field("current", &state.current.key())
            .field("depth", &state.stack.len())
            .field("publisher", &state.publisher)
            .finish()
    }
}

impl Navigator {
    /// Builds every named group and makes the layout's initial group current.
    ///
    /// The publisher should already have written its header. Blocks are not
    /// started; call [`start`](Self::start).
    pub fn new(layout: Layout, publisher: Publisher) -> Arc<Self> {
        Arc::new_cyclic(|me| {
            let groups: Vec<Arc<Group>> = layout
                .groups
                .into_iter()
                .map(|(name, blocks)| Group::new(name, blocks, Weak::clone(me)))
                .collect();
            let current = Arc::clone(&groups[layout.initial]);
            Self {
                state: Mutex::new(NavState {
                    groups,
                    current,
                    stack: Vec::new(),
                    publisher,
                }),
            }
        })
    }

    fn state(&self) -> MutexGuard<'_, NavState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Draws the initial frame, then starts every named group in order.
    ///
    /// `RunOnce` blocks have run when this returns. Hidden groups are
    /// started too and keep updating in the background.
    pub async fn start(&self) -> Vec<JoinHandle<()>> {
        let groups = {
            let mut state = self.state();
            state.draw();
            state.groups.clone()
        };
        let mut handles = Vec::new();
        for group in groups {
            handles.extend(group.start().await);
        }
        log::info!("[Navigator] Started with {} background tasks", handles.len());
        handles
    }

    /// The visible group.
    pub fn current(&self) -> Arc<Group> {
        Arc::clone(&self.state().current)
    }

    /// Number of groups hidden behind open submenus.
    pub fn depth(&self) -> usize {
        self.state().stack.len()
    }

    /// Redraws if `group` is the visible one; otherwise does nothing.
    pub fn redraw_if_current(&self, group: &Group) {
        let mut state = self.state();
        if std::ptr::eq(Arc::as_ptr(&state.current), group) {
            state.draw();
        }
    }

    /// Redraws the visible group unconditionally.
    pub fn redraw(&self) {
        self.state().draw();
    }

    /// Makes the named group visible and drops any open submenus.
    ///
    /// Unknown names are logged and leave everything unchanged. Returns
    /// whether the switch happened.
    pub fn switch_to(&self, key: &str) -> bool {
        let mut state = self.state();
        let Some(group) = state.groups.iter().find(|g| g.key() == key).cloned() else {
            log::warn!("[Navigator] No group named `{}`, staying on `{}`", key, state.current.key());
            return false;
        };
        log::debug!("[Navigator] Switching `{}` -> `{}`", state.current.key(), key);
        state.stack.clear();
        state.current = group;
        state.draw();
        true
    }

    /// Opens a submenu built from `blocks` plus a trailing `back` block.
    ///
    /// The submenu's blocks are started before it becomes visible, so its
    /// first frame already shows `RunOnce` results. Each push builds fresh
    /// runtimes. Blocks that would shadow `back` or an earlier entry are
    /// dropped.
    pub async fn push(self: &Arc<Self>, key: String, mut blocks: Vec<BlockDefinition>) {
        let mut seen: Vec<String> = Vec::with_capacity(blocks.len());
        blocks.retain(|block| {
            if block.instance == BACK_INSTANCE || seen.contains(&block.instance) {
                log::warn!("[Navigator] Dropping duplicate block `{}` from `{}`", block.instance, key);
                return false;
            }
            seen.push(block.instance.clone());
            true
        });
        blocks.push(BlockDefinition::back());
        let group = Group::new(key, blocks, Arc::downgrade(self));
        group.start().await;

        let mut state = self.state();
        log::debug!("[Navigator] Opening `{}` over `{}`", group.key(), state.current.key());
        let previous = std::mem::replace(&mut state.current, group);
        state.stack.push(previous);
        state.draw();
    }

    /// Closes the visible submenu and shows the group below it.
    ///
    /// With no submenu open this is a no-op. Returns whether a submenu was
    /// closed.
    pub fn pop(&self) -> bool {
        let mut state = self.state();
        let Some(previous) = state.stack.pop() else {
            log::debug!("[Navigator] No submenu to close");
            return false;
        };
        log::debug!("[Navigator] Closing `{}`, back to `{}`", state.current.key(), previous.key());
        state.current = previous;
        state.draw();
        true
    }

    /// Routes a click to the visible group.
    pub async fn dispatch(&self, event: &ClickEvent) {
        let group = self.current();
        group.click(event).await;
    }

    /// Closes the output. Further draws are ignored.
    pub fn shutdown(&self) {
        if let Err(err) = self.state().publisher.close() {
            log::error!("[Navigator] Failed to close output: {:#}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::CaptureSink;

    fn layout() -> Layout {
        Layout::new(
            vec![
                (
                    "main".to_string(),
                    vec![
                        BlockDefinition::new("clock").with_text("12:00"),
                        BlockDefinition::new("power")
                            .with_text("P")
                            .on_click(OnClickAction::SwitchGroup("power".into())),
                        BlockDefinition::new("menu")
                            .with_text("M")
                            .on_click(OnClickAction::PushSubmenu(vec![
                                BlockDefinition::new("item").with_text("I"),
                            ])),
                    ],
                ),
                (
                    "power".to_string(),
                    vec![BlockDefinition::new("off")
                        .with_text("Off")
                        .on_click(OnClickAction::SwitchGroup("main".into()))],
                ),
            ],
            None,
        )
        .unwrap()
    }

    fn navigator() -> (Arc<Navigator>, CaptureSink) {
        let (mut publisher, sink) = Publisher::capture();
        publisher.begin().unwrap();
        (Navigator::new(layout(), publisher), sink)
    }

    #[test]
    fn test_layout_validation() {
        assert!(Layout::new(vec![], None).is_err());
        assert!(Layout::new(vec![("a".into(), vec![]), ("a".into(), vec![])], None).is_err());
        assert!(Layout::new(
            vec![("a".into(), vec![BlockDefinition::new("x"), BlockDefinition::new("x")])],
            None
        )
        .is_err());
        assert!(Layout::new(vec![("a".into(), vec![])], Some("b")).is_err());

        let layout = Layout::new(vec![("a".into(), vec![]), ("b".into(), vec![])], Some("b")).unwrap();
        assert_eq!(layout.initial(), "b");
        assert_eq!(layout.names().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    fn menu_group(items: Vec<BlockDefinition>) -> Vec<(String, Vec<BlockDefinition>)> {
        vec![(
            "main".to_string(),
            vec![BlockDefinition::new("menu").on_click(OnClickAction::PushSubmenu(items))],
        )]
    }

    #[test]
    fn test_layout_rejects_back_in_submenu() {
        let err = Layout::new(menu_group(vec![BlockDefinition::new("back")]), None).unwrap_err();
        assert!(err.to_string().contains("reserved"), "{err}");
    }

    #[test]
    fn test_layout_rejects_duplicate_submenu_instances() {
        let items = vec![BlockDefinition::new("x"), BlockDefinition::new("x")];
        let err = Layout::new(menu_group(items), None).unwrap_err();
        assert!(err.to_string().contains("`x` appears twice in `menu/submenu`"), "{err}");
    }

    #[test]
    fn test_layout_checks_nested_and_compound_submenus() {
        let nested = BlockDefinition::new("deeper").on_click(OnClickAction::Compound(vec![
            OnClickAction::RunCommand("true".into()),
            OnClickAction::PushSubmenu(vec![BlockDefinition::new("back")]),
        ]));
        assert!(Layout::new(menu_group(vec![nested]), None).is_err());

        // `back` is only reserved inside submenus.
        assert!(Layout::new(vec![("main".into(), vec![BlockDefinition::new("back")])], None).is_ok());
    }

    #[tokio::test]
    async fn test_push_drops_blocks_shadowing_back() {
        let (nav, sink) = navigator();
        let blocks = vec![
            BlockDefinition::new("back").with_text("mine"),
            BlockDefinition::new("item").with_text("I"),
            BlockDefinition::new("item").with_text("again"),
        ];
        nav.push("menu/submenu".to_string(), blocks).await;
        assert_eq!(sink.texts().last().unwrap(), &vec!["I", "BACK"]);

        nav.dispatch(&ClickEvent::new("back")).await;
        assert_eq!(nav.depth(), 0);
        assert_eq!(nav.current().key(), "main");
    }

    #[tokio::test]
    async fn test_start_draws_initial_group() {
        let (nav, sink) = navigator();
        nav.start().await;
        assert_eq!(sink.texts(), vec![vec!["12:00", "P", "M"]]);
        assert_eq!(nav.current().key(), "main");
    }

    #[tokio::test]
    async fn test_switch_to_known_group_draws_once() {
        let (nav, sink) = navigator();
        assert!(nav.switch_to("power"));
        assert_eq!(sink.texts(), vec![vec!["Off"]]);
        assert_eq!(nav.current().key(), "power");
    }

    #[tokio::test]
    async fn test_switch_to_unknown_group_changes_nothing() {
        let (nav, sink) = navigator();
        assert!(!nav.switch_to("nope"));
        assert!(sink.frames().is_empty());
        assert_eq!(nav.current().key(), "main");
    }

    #[tokio::test]
    async fn test_click_on_missing_instance_emits_nothing() {
        let (nav, sink) = navigator();
        nav.dispatch(&ClickEvent::new("off")).await;
        assert!(sink.frames().is_empty());
        assert_eq!(nav.current().key(), "main");
    }

    #[tokio::test]
    async fn test_click_switches_group() {
        let (nav, sink) = navigator();
        nav.dispatch(&ClickEvent::new("power")).await;
        assert_eq!(nav.current().key(), "power");
        nav.dispatch(&ClickEvent::new("off")).await;
        assert_eq!(nav.current().key(), "main");
        assert_eq!(sink.frames().len(), 2);
    }

    #[tokio::test]
    async fn test_push_then_back_restores_previous_frame() {
        let (nav, sink) = navigator();
        nav.redraw();
        let before = nav.current();

        nav.dispatch(&ClickEvent::new("menu")).await;
        assert_eq!(nav.depth(), 1);
        assert_eq!(nav.current().key(), "menu/submenu");

        nav.dispatch(&ClickEvent::new("back")).await;
        assert_eq!(nav.depth(), 0);
        assert!(Arc::ptr_eq(&nav.current(), &before));

        let frames = sink.frames();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1].len(), 2);
        assert_eq!(frames[1][1]["instance"], "back");
        assert_eq!(frames[1][1]["full_text"], "BACK");
        assert_eq!(frames[0], frames[2]);
    }

    #[tokio::test]
    async fn test_pop_on_empty_stack_is_noop() {
        let (nav, sink) = navigator();
        assert!(!nav.pop());
        assert!(sink.frames().is_empty());
    }

    #[tokio::test]
    async fn test_switch_discards_submenu_stack() {
        let (nav, _sink) = navigator();
        nav.dispatch(&ClickEvent::new("menu")).await;
        assert_eq!(nav.depth(), 1);
        assert!(nav.switch_to("power"));
        assert_eq!(nav.depth(), 0);
        assert!(!nav.pop());
    }

    #[tokio::test]
    async fn test_hidden_group_notify_is_suppressed() {
        let (nav, sink) = navigator();
        let hidden = nav.state().groups[1].clone();
        hidden.notify();
        assert!(sink.frames().is_empty());
        nav.current().notify();
        assert_eq!(sink.frames().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_output() {
        let (nav, sink) = navigator();
        nav.redraw();
        nav.shutdown();
        nav.redraw();
        let out = sink.contents();
        assert!(out.ends_with("]]\n"));
        assert_eq!(sink.frames().len(), 1);
    }
}

//! Groups: one screen's worth of blocks.
//!
//! A group keeps its blocks in display order and never changes membership.
//! It does not draw itself; change notifications go to the [`Navigator`],
//! which only publishes the group that is currently visible.

use std::sync::{Arc, Weak};

use tokio::task::JoinHandle;

use crate::block::{BlockDefinition, BlockRuntime};
use crate::navigator::Navigator;
use crate::protocol::{ClickEvent, Props};

/// An ordered set of blocks shown together.
#[derive(Debug)]
pub struct Group {
    key: String,
    blocks: Vec<Arc<BlockRuntime>>,
    navigator: Weak<Navigator>,
}

impl Group {
    /// Builds a group and one runtime per definition.
    ///
    /// Blocks are not started; call [`start`](Self::start).
    pub fn new(
        key: impl Into<String>,
        definitions: Vec<BlockDefinition>,
        navigator: Weak<Navigator>,
    ) -> Arc<Self> {
        let key = key.into();
        Arc::new_cyclic(|me| Self {
            key,
            blocks: definitions
                .into_iter()
                .map(|definition| Arc::new(BlockRuntime::new(definition, Weak::clone(me))))
                .collect(),
            navigator,
        })
    }

    /// Name of the group (or `<instance>/submenu` for submenus).
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Blocks in display order.
    pub fn blocks(&self) -> &[Arc<BlockRuntime>] {
        &self.blocks
    }

    /// Looks up a block by instance key.
    pub fn find(&self, instance: &str) -> Option<&Arc<BlockRuntime>> {
        self.blocks.iter().find(|block| block.instance() == instance)
    }

    pub(crate) fn navigator(&self) -> Option<Arc<Navigator>> {
        self.navigator.upgrade()
    }

    /// Starts every block in display order.
    ///
    /// `RunOnce` blocks have finished when this returns. Returns the handles
    /// of the polling and streaming tasks.
    pub async fn start(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for block in &self.blocks {
            if let Some(handle) = block.start().await {
                handles.push(handle);
            }
        }
        log::debug!(
            "[Group {}] Started {} blocks ({} background tasks)",
            self.key,
            self.blocks.len(),
            handles.len()
        );
        handles
    }

    /// Routes a click to the block it names.
    ///
    /// Clicks for blocks that are not in this group are dropped; they are
    /// expected when a click races a group switch. Returns whether a block
    /// handled the click.
    pub async fn click(&self, event: &ClickEvent) -> bool {
        let Some(block) = self.find(&event.instance) else {
            log::debug!(
                "[Group {}] Dropping click for unknown instance `{}`",
                self.key,
                event.instance
            );
            return false;
        };
        block.on_click(event).await;
        true
    }

    /// Called by member blocks after a merge.
    pub fn notify(&self) {
        if let Some(navigator) = self.navigator.upgrade() {
            navigator.redraw_if_current(self);
        }
    }

    /// Current properties of every block, in display order.
    pub fn serialize(&self) -> Vec<Props> {
        self.blocks.iter().map(|block| block.snapshot()).collect()
    }
}

//! Applying configuration documents to the tree.
//!
//! A configuration is a JSON object whose keys are mapped properties:
//!
//! ```json
//! { "children": { "menu": { "type": "Group", "x": 4,
//!     "extras": { "in": { "type": "Fade", "from": 0, "to": 1, "duration": 10, "on": true } } } },
//!   "focus": "menu" }
//! ```
//!
//! Keys are applied in document order, so `serde_json` is built with
//! `preserve_order`.

use arbor_core::{Error, Result};
use serde_json::{Map, Value};

use crate::group::FocusBehaviour;
use crate::node::{NodeFlags, NodeId};
use crate::registry;
use crate::scene::Scene;

pub(crate) fn type_of(config: &Value) -> Option<&str> {
    config.get("type").and_then(Value::as_str)
}

pub(crate) fn as_object<'a>(what: &str, config: &'a Value) -> Result<&'a Map<String, Value>> {
    config
        .as_object()
        .ok_or_else(|| Error::Config(format!("{what}: expected an object, got {config}")))
}

impl Scene {
    /// Builds a child of `group` from `config`, which must name a registered
    /// `type`. The child joins its parent only after its whole configuration
    /// applied; on failure nothing is left behind. An existing child with the
    /// same name is replaced once its successor is fully built, and the
    /// successor takes over its place.
    pub fn create_child(&mut self, group: NodeId, name: &str, config: &Value) -> Result<NodeId> {
        let props = as_object(name, config)?;
        let tag = type_of(config).ok_or_else(|| Error::MissingType {
            name: name.to_string(),
        })?;
        let ctor = registry::component_ctor(tag)?;
        self.group_state(group)?;

        let id = self.alloc(name, tag, Some(group));
        let staged = ctor(self, id).and_then(|()| self.configure_props(id, props));
        if let Err(e) = staged {
            log::debug!("discarding `{name}` ({tag}): {e}");
            if let Err(cleanup) = self.remove_now(id) {
                log::warn!("cleanup of `{name}` failed: {cleanup}");
            }
            return Err(e);
        }

        let replaced = self.child(group, name);
        let slot = |ids: &[NodeId]| replaced.and_then(|old| ids.iter().position(|&c| c == old));
        let g = self.group_state(group)?;
        let (at, layer_at) = (slot(&g.order), slot(&g.draw_order));
        let refocus = replaced.is_some() && g.focus == replaced;
        let removed = match replaced {
            Some(old) => self.remove_now(old),
            None => Ok(()),
        };

        let g = self.group_state_mut(group)?;
        let (end, top) = (g.order.len(), g.draw_order.len());
        g.order.insert(at.map_or(end, |i| i.min(end)), id);
        g.draw_order.insert(layer_at.map_or(top, |i| i.min(top)), id);
        g.by_name.insert(name.to_string(), id);
        let (focus_all, hide) = (g.behaviour == FocusBehaviour::All, g.focus_visible);
        self.book_redraw();
        log::debug!("created {} ({tag})", self.full_path(id)?);

        if hide {
            self.node_mut(id)?.flags.remove(NodeFlags::VISIBLE);
        }
        if let Some(alter) = self.node_mut(id)?.layer_request.take() {
            self.alter_child_layer(group, name, &alter)?;
        }
        if refocus {
            self.move_focus(group, id)?;
        }
        if focus_all {
            self.sync_focus_flags(group)?;
        }
        removed.map(|()| id)
    }

    /// Applies `{ name: config }` to the children of `group`. Existing
    /// children are reconfigured unless `config` names a different type, in
    /// which case they are rebuilt. `null` removes the child.
    pub(crate) fn apply_children(&mut self, group: NodeId, children: &Value) -> Result<()> {
        for (name, config) in as_object("children", children)? {
            let existing = self.child(group, name);
            if config.is_null() {
                if let Some(c) = existing {
                    self.delete(c)?;
                }
                continue;
            }
            let reuse = match existing {
                Some(c) => {
                    let current = &self.node(c)?.type_tag;
                    type_of(config).is_none_or(|t| t == current).then_some(c)
                }
                None => None,
            };
            match reuse {
                Some(c) => self.configure(c, config)?,
                None => {
                    self.create_child(group, name, config)?;
                }
            }
        }
        Ok(())
    }

    /// Applies the same configuration to every live child of `group`.
    pub(crate) fn apply_all_children(&mut self, group: NodeId, config: &Value) -> Result<()> {
        let config = config.clone();
        self.for_each(group, move |s, child| s.configure(child, &config))
    }
}

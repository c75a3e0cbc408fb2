use std::collections::{HashMap, HashSet};

use arbor_core::{Accessor, Dir, Error, EventDispatcher, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::type_of;
use crate::node::{Lifecycle, NodeFlags, NodeId, install_component, parse};
use crate::scene::Scene;

/// How many children of a group count as focused.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusBehaviour {
    /// Only the focused child receives input.
    #[default]
    One,
    /// Every child is focused and receives input; `focus` only tracks a
    /// cursor for flow links and `focusVisible`.
    All,
}

/// Child ownership and focus of a group. Children are owned exclusively.
#[derive(Debug, Default)]
pub struct GroupState {
    pub(crate) order: Vec<NodeId>,
    /// Back to front.
    pub(crate) draw_order: Vec<NodeId>,
    pub(crate) by_name: HashMap<String, NodeId>,
    pub(crate) focus: Option<NodeId>,
    /// Focus asked for by configuration before the child existed.
    pub(crate) focus_request: Option<String>,
    pub(crate) behaviour: FocusBehaviour,
    /// Only the focused child is visible.
    pub(crate) focus_visible: bool,
}

/// Structural outcome of [`Scene::populate`], by child name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PopulateDiff {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

impl PopulateDiff {
    /// No child was created or removed.
    pub fn is_structural_noop(&self) -> bool {
        self.created.is_empty() && self.removed.is_empty()
    }
}

#[derive(Deserialize)]
struct PopulateRequest {
    template: Value,
    count: usize,
}

pub fn install_group(scene: &mut Scene, id: NodeId) -> Result<()> {
    install_component(scene, id)?;
    scene.node_mut(id)?.group = Some(GroupState::default());

    scene.map_property(
        id,
        "focus",
        Accessor::new(
            move |s: &Scene| {
                Ok(match s.focused_child(id) {
                    Some(c) => Value::String(s.node(c)?.name.clone()),
                    None => Value::Null,
                })
            },
            move |s: &mut Scene, v| {
                let Some(name) = parse::<Option<String>>("focus", v)? else {
                    return Ok(());
                };
                s.group_state_mut(id)?.focus_request = Some(name);
                s.settle_focus_request(id)
            },
        )
        .with_recompute(move |s: &mut Scene| s.settle_focus_request(id)),
        &[],
    )?;
    scene.map_property(
        id,
        "focusBehaviour",
        Accessor::new(
            move |s: &Scene| parse_back(s.group_state(id)?.behaviour),
            move |s: &mut Scene, v| {
                let behaviour = parse("focusBehaviour", v)?;
                s.set_focus_behaviour(id, behaviour)
            },
        ),
        &[],
    )?;
    scene.map_property(
        id,
        "focusVisible",
        Accessor::new(
            move |s: &Scene| Ok(Value::Bool(s.group_state(id)?.focus_visible)),
            move |s: &mut Scene, v| {
                let on = parse("focusVisible", v)?;
                s.set_focus_visible(id, on)
            },
        ),
        &[],
    )?;
    scene.map_property(
        id,
        "children",
        Accessor::write_only(move |s: &mut Scene, v| s.apply_children(id, &v)),
        &["focus"],
    )?;
    scene.map_property(
        id,
        "allChildren",
        Accessor::write_only(move |s: &mut Scene, v| s.apply_all_children(id, &v)),
        &[],
    )?;
    scene.map_property(
        id,
        "populate",
        Accessor::write_only(move |s: &mut Scene, v| {
            let req: PopulateRequest = parse("populate", v)?;
            s.populate(id, &req.template, req.count).map(drop)
        }),
        &["focus"],
    )?;
    Ok(())
}

fn parse_back(behaviour: FocusBehaviour) -> Result<Value> {
    serde_json::to_value(behaviour).map_err(|e| Error::PropertyValue {
        name: "focusBehaviour".into(),
        reason: e.to_string(),
    })
}

impl Scene {
    pub(crate) fn group_state(&self, id: NodeId) -> Result<&GroupState> {
        let node = self.node(id)?;
        node.group
            .as_ref()
            .ok_or_else(|| Error::Config(format!("`{}` is not a group", node.name)))
    }

    pub(crate) fn group_state_mut(&mut self, id: NodeId) -> Result<&mut GroupState> {
        let node = self.node_mut(id)?;
        match node.group.as_mut() {
            Some(g) => Ok(g),
            None => Err(Error::Config(format!("`{}` is not a group", node.name))),
        }
    }

    /// Live child named `name`. Tombstoned children are treated as absent.
    pub fn child(&self, group: NodeId, name: &str) -> Option<NodeId> {
        let id = *self.get(group)?.group.as_ref()?.by_name.get(name)?;
        self.is_live(id).then_some(id)
    }

    /// Live children in insertion order. Empty for non-groups.
    pub fn children(&self, group: NodeId) -> Vec<NodeId> {
        self.get(group)
            .and_then(|n| n.group.as_ref())
            .map(|g| g.order.iter().copied().filter(|&c| self.is_live(c)).collect())
            .unwrap_or_default()
    }

    /// Visits the direct children of `group` in insertion order. Children
    /// deleted by `f` are skipped and reaped once the outermost traversal
    /// returns.
    pub fn for_each(
        &mut self,
        group: NodeId,
        mut f: impl FnMut(&mut Scene, NodeId) -> Result<()>,
    ) -> Result<()> {
        let order = self.group_state(group)?.order.clone();
        self.traversal_depth += 1;
        let mut visited = Ok(());
        for child in order {
            if !self.is_live(child) {
                continue;
            }
            if let Err(e) = f(self, child) {
                visited = Err(e);
                break;
            }
        }
        self.traversal_depth -= 1;
        let swept = if self.traversal_depth == 0 {
            self.sweep()
        } else {
            Ok(())
        };
        visited.and(swept)
    }

    /// Makes the children of `group` exactly `count` instances of `template`
    /// named `"0"`..`"count-1"`. Existing children of a matching type are only
    /// reconfigured, so repeating a call changes no structure. Every other
    /// child is removed.
    pub fn populate(
        &mut self,
        group: NodeId,
        template: &Value,
        count: usize,
    ) -> Result<PopulateDiff> {
        self.group_state(group)?;
        let tag = type_of(template).map(str::to_owned);
        let mut diff = PopulateDiff::default();

        for i in 0..count {
            let name = i.to_string();
            let reuse = match self.child(group, &name) {
                Some(c) => {
                    let current = &self.node(c)?.type_tag;
                    tag.as_ref().is_none_or(|t| t == current).then_some(c)
                }
                None => None,
            };
            match reuse {
                Some(c) => {
                    self.configure(c, template)?;
                    diff.updated.push(name);
                }
                None => {
                    self.create_child(group, &name, template)?;
                    diff.created.push(name);
                }
            }
        }

        let keep: HashSet<String> = (0..count).map(|i| i.to_string()).collect();
        for c in self.children(group) {
            let name = self.node(c)?.name.clone();
            if !keep.contains(&name) {
                self.delete(c)?;
                diff.removed.push(name);
            }
        }
        log::debug!(
            "populated {} x{count}: +{} ~{} -{}",
            self.full_path(group)?,
            diff.created.len(),
            diff.updated.len(),
            diff.removed.len()
        );
        Ok(diff)
    }

    pub fn focused_child(&self, group: NodeId) -> Option<NodeId> {
        let id = self.get(group)?.group.as_ref()?.focus?;
        self.is_live(id).then_some(id)
    }

    /// Focuses the child `name` of `group`. Unknown children are an error and
    /// leave focus unchanged. Returns `false` when the move was refused because
    /// the current focus is locked or the target is disabled.
    pub fn focus(&mut self, group: NodeId, name: &str) -> Result<bool> {
        let Some(target) = self.child(group, name) else {
            let path = format!("{}/{name}", self.full_path(group)?.trim_end_matches('/'));
            return Err(Error::path_not_found(path, name));
        };
        self.move_focus(group, target)
    }

    /// Moves focus within `group` towards a flow link. A missing target is
    /// logged and reported as `false`.
    pub fn flow(&mut self, group: NodeId, to: &str) -> Result<bool> {
        match self.child(group, to) {
            Some(target) => self.move_focus(group, target),
            None => {
                log::warn!("{to} was not found in {}, focus unchanged", self.full_path(group)?);
                Ok(false)
            }
        }
    }

    /// Routes a direction press into `id`. The focused child handles it first;
    /// `id` only runs its own `dir_press` when the child lets it bubble. A
    /// press that fires the component's flow link is consumed. Returns whether
    /// the press should bubble to the parent.
    pub fn navigate(&mut self, id: NodeId, dir: Dir) -> Result<bool> {
        if self.node(id)?.is_deleted() {
            return Ok(false);
        }
        // every focused child sees the press, any of them can stop it
        let mut bubble = true;
        for child in self.focus_targets(id) {
            bubble &= self.navigate(child, dir)?;
        }
        if !bubble {
            return Ok(false);
        }

        let bus = self.node(id)?.events.dir_press.clone();
        let bubble = bus.fire(self, dir)?.is_truthy();
        let node = self.node(id)?;
        if bubble
            && let Some(link) = node.flow(dir).map(str::to_owned)
            && let Some(parent) = node.parent
            && self.flow(parent, &link)?
        {
            return Ok(false);
        }
        Ok(bubble)
    }

    /// Direction press delivered to the active pane.
    pub fn press_dir(&mut self, dir: Dir) -> Result<bool> {
        match self.active_pane()? {
            Some(pane) => self.navigate(pane, dir),
            None => Ok(false),
        }
    }

    /// Fires `action` along the active pane's focus chain, deepest first. A
    /// component only sees the action when none of its focused children
    /// vetoed bubbling.
    pub fn press_action(&mut self, event: Value) -> Result<bool> {
        match self.active_pane()? {
            Some(pane) => self.deliver_action(pane, &event),
            None => Ok(false),
        }
    }

    fn deliver_action(&mut self, id: NodeId, event: &Value) -> Result<bool> {
        let mut bubble = true;
        for child in self.focus_targets(id) {
            bubble &= self.deliver_action(child, event)?;
        }
        if !bubble {
            return Ok(false);
        }
        if !self.is_live(id) {
            return Ok(true);
        }
        let bus = self.node(id)?.events.action.clone();
        Ok(bus.fire(self, event.clone())?.is_truthy())
    }

    /// Children of `id` that receive its input: the focused child, or every
    /// child under [`FocusBehaviour::All`].
    fn focus_targets(&self, id: NodeId) -> Vec<NodeId> {
        match self.get(id).and_then(|n| n.group.as_ref()) {
            Some(g) if g.behaviour == FocusBehaviour::All => self.children(id),
            _ => self.focused_child(id).into_iter().collect(),
        }
    }

    /// `from` and, in pre-order, every component that receives input through
    /// it. With single focus this is `from`, its focused child, that child's
    /// focused child, and so on.
    pub fn focus_chain(&self, from: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut pending = vec![from];
        pending.retain(|&id| self.is_live(id));
        while let Some(id) = pending.pop() {
            chain.push(id);
            pending.extend(self.focus_targets(id).into_iter().rev());
        }
        chain
    }

    pub fn set_focus_behaviour(&mut self, group: NodeId, behaviour: FocusBehaviour) -> Result<()> {
        let g = self.group_state_mut(group)?;
        if g.behaviour == behaviour {
            return Ok(());
        }
        g.behaviour = behaviour;
        log::debug!("{}: focus behaviour {behaviour:?}", self.full_path(group)?);
        self.sync_focus_flags(group)
    }

    /// Hides every child of `group` but the focused one while `on`.
    pub fn set_focus_visible(&mut self, group: NodeId, on: bool) -> Result<()> {
        let g = self.group_state_mut(group)?;
        if g.focus_visible == on {
            return Ok(());
        }
        g.focus_visible = on;
        if on {
            let focused = self.focused_child(group);
            for child in self.children(group) {
                self.node_mut(child)?.flags.set(NodeFlags::VISIBLE, Some(child) == focused);
            }
            self.book_redraw();
        }
        Ok(())
    }

    /// Brings FOCUSED and ACTIVE below `group` in line with its focus
    /// behaviour and cursor, then fires the changes, losses first.
    pub(crate) fn sync_focus_flags(&mut self, group: NodeId) -> Result<()> {
        let all = self.group_state(group)?.behaviour == FocusBehaviour::All;
        let focused = self.focused_child(group);
        let mut focus_changes = Vec::new();
        for child in self.children(group) {
            let want = all || Some(child) == focused;
            let flags = &mut self.node_mut(child)?.flags;
            if flags.contains(NodeFlags::FOCUSED) != want {
                flags.set(NodeFlags::FOCUSED, want);
                focus_changes.push((child, want));
            }
        }

        let active: HashSet<NodeId> = if self.node(group)?.is_active() {
            self.focus_chain(group).into_iter().collect()
        } else {
            HashSet::new()
        };
        let mut active_changes = Vec::new();
        let mut pending = self.children(group);
        while let Some(n) = pending.pop() {
            let want = active.contains(&n);
            let flags = &mut self.node_mut(n)?.flags;
            if flags.contains(NodeFlags::ACTIVE) != want {
                flags.set(NodeFlags::ACTIVE, want);
                active_changes.push((n, want));
            }
            pending.extend(self.children(n));
        }

        focus_changes.sort_by_key(|&(_, on)| on);
        active_changes.sort_by_key(|&(_, on)| on);
        for (n, on) in focus_changes {
            self.fire_flag(n, |l| &l.focus_change, on)?;
        }
        for (n, on) in active_changes {
            self.fire_flag(n, |l| &l.active_change, on)?;
        }
        self.book_redraw();
        Ok(())
    }

    /// Restacks the child `name` of `group`. `alter` is `"+"` (top), `"-"`
    /// (bottom), `"+other"` (just above `other`) or `"-other"` (just below).
    pub fn alter_child_layer(&mut self, group: NodeId, name: &str, alter: &str) -> Result<()> {
        let Some(target) = self.child(group, name) else {
            let path = format!("{}/{name}", self.full_path(group)?.trim_end_matches('/'));
            return Err(Error::path_not_found(path, name));
        };
        let (raise, other) = match alter.split_at_checked(1) {
            Some(("+", other)) => (true, other),
            Some(("-", other)) => (false, other),
            _ => {
                return Err(Error::PropertyValue {
                    name: "layer".into(),
                    reason: format!("`{alter}` must start with `+` or `-`"),
                });
            }
        };
        let anchor = match other {
            "" => None,
            other => match self.child(group, other) {
                Some(a) if a == target => return Ok(()),
                Some(a) => Some(a),
                None => {
                    let base = self.full_path(group)?;
                    let path = format!("{}/{other}", base.trim_end_matches('/'));
                    return Err(Error::path_not_found(path, other));
                }
            },
        };

        let layers = &mut self.group_state_mut(group)?.draw_order;
        layers.retain(|&c| c != target);
        let at = match (anchor, raise) {
            (None, true) => layers.len(),
            (None, false) => 0,
            (Some(a), raise) => {
                let pos = layers.iter().position(|&c| c == a).unwrap_or(layers.len());
                if raise { pos + 1 } else { pos }
            }
        };
        layers.insert(at.min(layers.len()), target);
        self.book_redraw();
        Ok(())
    }

    /// `layer` of a component: applied now if it already sits in its parent's
    /// draw order, otherwise once it joins.
    pub(crate) fn request_layer(&mut self, id: NodeId, alter: String) -> Result<()> {
        let node = self.node(id)?;
        let Some(parent) = node.parent else {
            log::warn!("`{}` has no parent to restack in", node.name);
            return Ok(());
        };
        let name = node.name.clone();
        if self.group_state(parent)?.draw_order.contains(&id) {
            self.alter_child_layer(parent, &name, &alter)
        } else {
            self.node_mut(id)?.layer_request = Some(alter);
            Ok(())
        }
    }

    /// Child ids back to front.
    pub fn draw_order(&self, group: NodeId) -> Vec<NodeId> {
        self.get(group)
            .and_then(|n| n.group.as_ref())
            .map(|g| g.draw_order.iter().copied().filter(|&c| self.is_live(c)).collect())
            .unwrap_or_default()
    }

    pub(crate) fn settle_focus_request(&mut self, group: NodeId) -> Result<()> {
        let Some(name) = self.group_state(group)?.focus_request.clone() else {
            return Ok(());
        };
        match self.child(group, &name) {
            Some(target) => {
                self.group_state_mut(group)?.focus_request = None;
                self.move_focus(group, target).map(drop)
            }
            None => {
                log::debug!("{}: focus `{name}` pending", self.full_path(group)?);
                Ok(())
            }
        }
    }

    pub(crate) fn move_focus(&mut self, group: NodeId, target: NodeId) -> Result<bool> {
        let old = self.focused_child(group);
        if old == Some(target) {
            return Ok(true);
        }
        if let Some(o) = old
            && self.node(o)?.flags.contains(NodeFlags::LOCKED)
        {
            return Ok(false);
        }
        if !self.node(target)?.flags.contains(NodeFlags::ENABLED) {
            return Ok(false);
        }
        if self.group_state(group)?.focus_visible {
            if let Some(o) = old {
                self.node_mut(o)?.flags.remove(NodeFlags::VISIBLE);
            }
            self.node_mut(target)?.flags.insert(NodeFlags::VISIBLE);
        }
        if self.group_state(group)?.behaviour == FocusBehaviour::All {
            let g = self.group_state_mut(group)?;
            g.focus = Some(target);
            g.focus_request = None;
            self.book_redraw();
            return Ok(true);
        }

        let group_active = self.node(group)?.is_active();
        let deactivated = match old {
            Some(o) if group_active => self.focus_chain(o),
            _ => Vec::new(),
        };

        if let Some(o) = old {
            self.node_mut(o)?.flags.remove(NodeFlags::FOCUSED);
        }
        for &n in &deactivated {
            self.node_mut(n)?.flags.remove(NodeFlags::ACTIVE);
        }
        let g = self.group_state_mut(group)?;
        g.focus = Some(target);
        g.focus_request = None;
        self.node_mut(target)?.flags.insert(NodeFlags::FOCUSED);
        let activated = if group_active {
            self.focus_chain(target)
        } else {
            Vec::new()
        };
        for &n in &activated {
            self.node_mut(n)?.flags.insert(NodeFlags::ACTIVE);
        }

        if let Some(o) = old {
            self.fire_flag(o, |l| &l.focus_change, false)?;
        }
        for n in deactivated {
            self.fire_flag(n, |l| &l.active_change, false)?;
        }
        self.fire_flag(target, |l| &l.focus_change, true)?;
        for n in activated {
            self.fire_flag(n, |l| &l.active_change, true)?;
        }
        self.book_redraw();
        Ok(true)
    }

    pub(crate) fn fire_flag(
        &mut self,
        id: NodeId,
        bus: fn(&Lifecycle) -> &EventDispatcher<bool, Scene>,
        value: bool,
    ) -> Result<()> {
        let Some(node) = self.get(id) else {
            return Ok(());
        };
        let bus = bus(&node.events).clone();
        bus.fire(self, value).map(drop)
    }
}

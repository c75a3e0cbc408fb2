use std::collections::VecDeque;
use std::rc::Rc;

use arbor_core::{Accessor, Error, EventDispatcher, Mode, Result, Vec2};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use slotmap::SlotMap;

use crate::config::as_object;
use crate::extras::{Extra, ExtraId};
use crate::node::{Component, NodeFlags, NodeId, Tick};
use crate::surface::{DrawCall, Surface};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneSettings {
    pub width: f32,
    pub height: f32,
}

impl Default for SceneSettings {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 800.0,
        }
    }
}

/// A frame failure that was isolated instead of aborting the tick.
#[derive(Debug)]
pub struct TickFailure {
    /// Pane whose frame dispatch failed; `None` for scene-level listeners
    /// and the reap sweep.
    pub pane: Option<String>,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct TickReport {
    pub frame: u64,
    pub rendered: bool,
    pub failures: Vec<TickFailure>,
}

impl TickReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The scene manager: owns every component and extra, the pane registry and
/// the redraw flag.
pub struct Scene {
    pub(crate) nodes: SlotMap<NodeId, Component>,
    pub(crate) extras: SlotMap<ExtraId, Extra>,
    pub(crate) panes: Vec<(String, NodeId)>,
    pub(crate) active_pane: Option<NodeId>,
    pub(crate) traversal_depth: u32,
    pending_reap: VecDeque<NodeId>,
    redraw_booked: bool,
    frame: u64,
    renders: u64,
    settings: SceneSettings,
    on_frame: EventDispatcher<Tick, Scene>,
    on_render: EventDispatcher<u64, Scene>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new(SceneSettings::default())
    }
}

impl Scene {
    pub fn new(settings: SceneSettings) -> Self {
        Self {
            nodes: SlotMap::with_key(),
            extras: SlotMap::with_key(),
            panes: Vec::new(),
            active_pane: None,
            traversal_depth: 0,
            pending_reap: VecDeque::new(),
            redraw_booked: false,
            frame: 0,
            renders: 0,
            settings,
            on_frame: EventDispatcher::new("scene.on_frame", Mode::None),
            on_render: EventDispatcher::new("scene.on_render", Mode::None),
        }
    }

    pub fn settings(&self) -> SceneSettings {
        self.settings
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Completed render passes so far.
    pub fn renders(&self) -> u64 {
        self.renders
    }

    /// Fired once per tick before any pane's frame dispatch.
    pub fn on_frame(&self) -> &EventDispatcher<Tick, Scene> {
        &self.on_frame
    }

    /// Fired after each completed render pass with the frame number.
    pub fn on_render(&self) -> &EventDispatcher<u64, Scene> {
        &self.on_render
    }

    pub(crate) fn alloc(&mut self, name: &str, type_tag: &str, parent: Option<NodeId>) -> NodeId {
        self.nodes.insert(Component::new(name, type_tag, parent))
    }

    pub fn get(&self, id: NodeId) -> Option<&Component> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Component> {
        self.nodes.get_mut(id)
    }

    pub fn node(&self, id: NodeId) -> Result<&Component> {
        self.nodes
            .get(id)
            .ok_or_else(|| Error::StaleNode(format!("{id:?}")))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Component> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| Error::StaleNode(format!("{id:?}")))
    }

    /// Present and not tombstoned.
    pub fn is_live(&self, id: NodeId) -> bool {
        self.nodes.get(id).is_some_and(|n| !n.is_deleted())
    }

    /// Adds a property to the component's mapper. Only valid while no
    /// property of that component is being applied.
    pub fn map_property(
        &mut self,
        id: NodeId,
        name: &str,
        accessor: Accessor<Scene>,
        dependents: &[&str],
    ) -> Result<()> {
        let node = self.node_mut(id)?;
        let label = node.name.clone();
        Rc::get_mut(&mut node.mapper)
            .ok_or_else(|| Error::InvariantViolation(format!("mapper of `{label}` is in use")))?
            .map(name, accessor, dependents)
    }

    pub fn add_dependents(&mut self, id: NodeId, name: &str, dependents: &[&str]) -> Result<()> {
        let node = self.node_mut(id)?;
        let label = node.name.clone();
        Rc::get_mut(&mut node.mapper)
            .ok_or_else(|| Error::InvariantViolation(format!("mapper of `{label}` is in use")))?
            .add_dependents(name, dependents)
    }

    pub fn set(&mut self, id: NodeId, name: &str, value: Value) -> Result<()> {
        let mapper = self.node(id)?.mapper.clone();
        mapper.set(self, name, value)
    }

    pub fn prop(&self, id: NodeId, name: &str) -> Result<Value> {
        self.node(id)?.mapper.get(self, name)
    }

    /// Applies a configuration object as one batch.
    pub fn configure(&mut self, id: NodeId, config: &Value) -> Result<()> {
        let name = self.node(id)?.name.clone();
        self.configure_props(id, as_object(&name, config)?)
    }

    pub(crate) fn configure_props(&mut self, id: NodeId, props: &Map<String, Value>) -> Result<()> {
        let mapper = self.node(id)?.mapper.clone();
        mapper.mass_set(self, props)
    }

    /// Every readable property of the component.
    pub fn bundle(&self, id: NodeId) -> Result<Map<String, Value>> {
        self.node(id)?.mapper.mass_get(self)
    }

    /// Requests a render at the end of the current tick. Returns `true` only
    /// for the call that booked it.
    pub fn book_redraw(&mut self) -> bool {
        !std::mem::replace(&mut self.redraw_booked, true)
    }

    pub fn redraw_booked(&self) -> bool {
        self.redraw_booked
    }

    /// Tombstones the component. It stops receiving frames and drawing at
    /// once and is reaped when no traversal is in progress.
    pub fn delete(&mut self, id: NodeId) -> Result<()> {
        let node = self.node_mut(id)?;
        if node.flags.contains(NodeFlags::DELETED) {
            return Ok(());
        }
        node.flags.insert(NodeFlags::DELETED);
        self.pending_reap.push_back(id);
        self.book_redraw();
        if self.traversal_depth == 0 {
            self.sweep()
        } else {
            Ok(())
        }
    }

    /// Reaps every tombstoned component queued so far. The first failure is
    /// returned after the queue is drained.
    pub(crate) fn sweep(&mut self) -> Result<()> {
        let mut first = Ok(());
        while let Some(id) = self.pending_reap.pop_front() {
            let reaped = self.reap_guarded(id);
            if first.is_ok() {
                first = reaped;
            }
        }
        first
    }

    /// Reaps `id` immediately, then anything its listeners deleted.
    pub(crate) fn remove_now(&mut self, id: NodeId) -> Result<()> {
        let reaped = self.reap_guarded(id);
        if self.traversal_depth == 0 {
            reaped.and(self.sweep())
        } else {
            reaped
        }
    }

    fn reap_guarded(&mut self, id: NodeId) -> Result<()> {
        self.traversal_depth += 1;
        let reaped = self.reap(id);
        self.traversal_depth -= 1;
        reaped
    }

    /// Removes `id` and its subtree, children first. Structural removal always
    /// completes; the first listener failure is returned.
    fn reap(&mut self, id: NodeId) -> Result<()> {
        let Some(node) = self.nodes.get_mut(id) else {
            return Ok(());
        };
        node.flags.insert(NodeFlags::DELETED);
        let children = node.group.as_ref().map(|g| g.order.clone()).unwrap_or_default();
        let mut first = Ok(());
        let mut keep = |r: Result<()>| {
            if first.is_ok() {
                first = r;
            }
        };

        for child in children {
            keep(self.reap(child));
        }
        if let Some(node) = self.nodes.get(id) {
            let on_delete = node.events.on_delete.clone();
            keep(on_delete.fire(self, id).map(drop));
        }
        let extras: Vec<String> = self
            .nodes
            .get(id)
            .map(|n| n.extras.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default();
        for name in extras {
            keep(self.detach(id, &name).map(drop));
        }

        let Some(node) = self.nodes.remove(id) else {
            return first;
        };
        if let Some(parent) = node.parent
            && let Some(g) = self.nodes.get_mut(parent).and_then(|p| p.group.as_mut())
        {
            g.order.retain(|&c| c != id);
            g.draw_order.retain(|&c| c != id);
            if g.by_name.get(&node.name) == Some(&id) {
                g.by_name.remove(&node.name);
            }
            if g.focus == Some(id) {
                g.focus = None;
            }
        }
        self.panes.retain(|&(_, p)| p != id);
        if self.active_pane == Some(id) {
            self.active_pane = None;
        }
        self.pending_reap.retain(|&p| p != id);
        self.book_redraw();
        log::debug!("reaped `{}` ({})", node.name, node.type_tag);
        first
    }

    /// One scheduler step: scene `on_frame`, then each pane's subtree in
    /// pre-order, then the reap sweep, then at most one render pass.
    ///
    /// Frame failures are isolated per pane and returned in the report. A
    /// render failure aborts the tick with [`Error::Render`].
    pub fn tick(&mut self, dt: f32, surface: &mut dyn Surface) -> Result<TickReport> {
        self.frame += 1;
        let tick = Tick {
            frame: self.frame,
            dt,
        };
        let mut report = TickReport {
            frame: self.frame,
            ..Default::default()
        };

        self.traversal_depth += 1;
        let on_frame = self.on_frame.clone();
        if let Err(error) = on_frame.fire(self, tick) {
            log::error!("frame {}: scene listener failed: {error}", tick.frame);
            report.failures.push(TickFailure { pane: None, error });
        }
        for (name, pane) in self.panes.clone() {
            if let Err(error) = self.dispatch_frame(pane, tick) {
                log::error!("frame {}: pane `{name}` failed: {error}", tick.frame);
                report.failures.push(TickFailure {
                    pane: Some(name),
                    error,
                });
            }
        }
        self.traversal_depth -= 1;

        if let Err(error) = self.sweep() {
            log::error!("frame {}: reap failed: {error}", tick.frame);
            report.failures.push(TickFailure { pane: None, error });
        }
        report.rendered = self.render(surface)?;
        Ok(report)
    }

    fn dispatch_frame(&mut self, id: NodeId, tick: Tick) -> Result<()> {
        let Some(node) = self.nodes.get(id).filter(|n| !n.is_deleted()) else {
            return Ok(());
        };
        let frame = node.events.frame.clone();
        let children = node.group.as_ref().map(|g| g.order.clone()).unwrap_or_default();
        frame.fire(self, tick)?;
        for child in children {
            self.dispatch_frame(child, tick)?;
        }
        Ok(())
    }

    /// Draws every visible pane if a redraw is booked. Consumes the booking
    /// first, so redraws booked while drawing apply to the next tick.
    pub fn render(&mut self, surface: &mut dyn Surface) -> Result<bool> {
        if !std::mem::take(&mut self.redraw_booked) {
            return Ok(false);
        }
        self.traversal_depth += 1;
        let drawn = self.draw_panes(surface);
        self.traversal_depth -= 1;
        drawn?;

        self.renders += 1;
        let (on_render, frame) = (self.on_render.clone(), self.frame);
        on_render.fire(self, frame)?;
        if self.traversal_depth == 0 {
            self.sweep()?;
        }
        Ok(true)
    }

    fn draw_panes(&mut self, surface: &mut dyn Surface) -> Result<()> {
        surface.begin(self.frame).map_err(Error::Render)?;
        for (_, pane) in self.panes.clone() {
            self.draw_node(pane, Vec2::default(), 1.0, surface)?;
        }
        surface.finish().map_err(Error::Render)
    }

    fn draw_node(
        &mut self,
        id: NodeId,
        origin: Vec2,
        alpha: f32,
        surface: &mut dyn Surface,
    ) -> Result<()> {
        let Some(node) = self.nodes.get(id).filter(|n| !n.is_deleted() && n.is_visible()) else {
            return Ok(());
        };
        let call = DrawCall {
            node: id,
            path: self.full_path(id)?,
            type_tag: node.type_tag.clone(),
            rect: self.bounds(id)?.translate(origin),
            alpha: alpha * node.alpha,
            paint: node.paint.clone(),
        };
        let draw = node.events.draw.clone();
        let children = node.group.as_ref().map(|g| g.draw_order.clone()).unwrap_or_default();

        draw.fire(self, call.clone()).map_err(render_error)?;
        surface.draw(&call).map_err(Error::Render)?;
        for child in children {
            self.draw_node(child, call.rect.origin(), call.alpha, surface)?;
        }
        Ok(())
    }
}

fn render_error(e: Error) -> Error {
    match e {
        Error::Render(_) => e,
        Error::Listener(inner) => Error::Render(inner),
        other => Error::Render(other.into()),
    }
}

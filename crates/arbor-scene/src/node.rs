use std::rc::Rc;

use arbor_core::{Accessor, Dir, Error, EventDispatcher, Mode, PropertyMapper, Rect, Result};
use bitflags::bitflags;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use smallvec::SmallVec;

use crate::extras::ExtraId;
use crate::group::GroupState;
use crate::scene::Scene;
use crate::surface::DrawCall;

slotmap::new_key_type! {
    /// Stable handle to a component in a [`Scene`]. Stale after the node is reaped.
    pub struct NodeId;
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct NodeFlags: u16 {
        const VISIBLE = 1;
        const ENABLED = 1 << 1;
        const LOCKED = 1 << 2;
        /// Tombstone. Set immediately, reaped at the next sweep.
        const DELETED = 1 << 3;
        const FOCUSED = 1 << 4;
        const ACTIVE = 1 << 5;
        const PANE = 1 << 6;
    }
}

/// Payload of every `frame` firing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tick {
    pub frame: u64,
    /// Seconds since the previous tick.
    pub dt: f32,
}

/// Lifecycle buses every component owns. Listeners get the scene mutably.
#[derive(Clone)]
pub struct Lifecycle {
    pub frame: EventDispatcher<Tick, Scene>,
    pub draw: EventDispatcher<DrawCall, Scene>,
    pub on_delete: EventDispatcher<NodeId, Scene>,
    pub focus_change: EventDispatcher<bool, Scene>,
    pub active_change: EventDispatcher<bool, Scene>,
    pub dir_press: EventDispatcher<Dir, Scene>,
    pub action: EventDispatcher<Value, Scene>,
}

impl Lifecycle {
    fn new(owner: &str) -> Self {
        let bus = |event: &str| format!("{owner}.{event}");
        Self {
            frame: EventDispatcher::new(bus("frame"), Mode::None),
            draw: EventDispatcher::new(bus("draw"), Mode::None),
            on_delete: EventDispatcher::new(bus("on_delete"), Mode::None),
            focus_change: EventDispatcher::new(bus("focus_change"), Mode::None),
            active_change: EventDispatcher::new(bus("active_change"), Mode::None),
            dir_press: EventDispatcher::new(bus("dir_press"), Mode::And),
            action: EventDispatcher::new(bus("action"), Mode::And),
        }
    }
}

pub struct Component {
    pub(crate) name: String,
    pub(crate) type_tag: String,
    pub(crate) parent: Option<NodeId>,
    pub(crate) rect: Rect,
    pub(crate) alpha: f32,
    pub(crate) flags: NodeFlags,
    pub(crate) flow: [Option<String>; 4],
    pub(crate) paint: Map<String, Value>,
    pub(crate) mapper: Rc<PropertyMapper<Scene>>,
    pub(crate) events: Lifecycle,
    pub(crate) extras: SmallVec<[(String, ExtraId); 2]>,
    pub(crate) group: Option<GroupState>,
    /// `layer` written before the component joined its parent.
    pub(crate) layer_request: Option<String>,
}

impl Component {
    pub(crate) fn new(name: &str, type_tag: &str, parent: Option<NodeId>) -> Self {
        Self {
            name: name.to_string(),
            type_tag: type_tag.to_string(),
            parent,
            rect: Rect::default(),
            alpha: 1.0,
            flags: NodeFlags::VISIBLE | NodeFlags::ENABLED,
            flow: Default::default(),
            paint: Map::new(),
            mapper: Rc::new(PropertyMapper::new(name)),
            events: Lifecycle::new(name),
            extras: SmallVec::new(),
            group: None,
            layer_request: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.contains(NodeFlags::DELETED)
    }

    pub fn is_visible(&self) -> bool {
        self.flags.contains(NodeFlags::VISIBLE)
    }

    pub fn is_focused(&self) -> bool {
        self.flags.contains(NodeFlags::FOCUSED)
    }

    pub fn is_active(&self) -> bool {
        self.flags.contains(NodeFlags::ACTIVE)
    }

    pub fn is_group(&self) -> bool {
        self.group.is_some()
    }

    pub fn is_pane(&self) -> bool {
        self.flags.contains(NodeFlags::PANE)
    }

    pub fn flow(&self, dir: Dir) -> Option<&str> {
        self.flow[flow_slot(dir)].as_deref()
    }

    pub fn paint(&self) -> &Map<String, Value> {
        &self.paint
    }

    pub fn events(&self) -> &Lifecycle {
        &self.events
    }

    pub fn mapper(&self) -> &PropertyMapper<Scene> {
        &self.mapper
    }

    pub fn extra_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.extras.iter().map(|(n, _)| n.as_str())
    }
}

pub(crate) fn flow_slot(dir: Dir) -> usize {
    match dir {
        Dir::Left => 0,
        Dir::Right => 1,
        Dir::Up => 2,
        Dir::Down => 3,
    }
}

pub(crate) fn parse<F: DeserializeOwned>(name: &str, v: Value) -> Result<F> {
    serde_json::from_value(v).map_err(|e| Error::PropertyValue {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// Typed field of the component behind `id`.
pub fn node_field<F>(
    id: NodeId,
    lens: fn(&Component) -> &F,
    lens_mut: fn(&mut Component) -> &mut F,
) -> Accessor<Scene>
where
    F: serde::Serialize + DeserializeOwned + 'static,
{
    Accessor::field(
        move |s: &Scene| s.get(id).map(lens),
        move |s: &mut Scene| s.get_mut(id).map(lens_mut),
    )
}

fn flag(id: NodeId, flag: NodeFlags, name: &'static str) -> Accessor<Scene> {
    Accessor::new(
        move |s: &Scene| Ok(Value::Bool(s.node(id)?.flags.contains(flag))),
        move |s: &mut Scene, v| {
            let on: bool = parse(name, v)?;
            s.node_mut(id)?.flags.set(flag, on);
            Ok(())
        },
    )
}

fn fixed(id: NodeId, name: &'static str, read: fn(&Component) -> &str) -> Accessor<Scene> {
    Accessor::new(
        move |s: &Scene| Ok(Value::String(read(s.node(id)?).to_string())),
        move |s: &mut Scene, v| {
            let current = read(s.node(id)?);
            match v.as_str() {
                Some(given) if given == current => Ok(()),
                _ => Err(Error::Config(format!(
                    "`{name}` of `{current}` cannot be changed to {v}"
                ))),
            }
        },
    )
}

fn flow_link(id: NodeId, dir: Dir) -> Accessor<Scene> {
    Accessor::new(
        move |s: &Scene| {
            Ok(s.node(id)?
                .flow(dir)
                .map_or(Value::Null, |f| Value::String(f.to_string())))
        },
        move |s: &mut Scene, v| {
            let link: Option<String> = parse(&format!("{}Flow", dir.as_str()), v)?;
            s.node_mut(id)?.flow[flow_slot(dir)] = link.filter(|l| !l.is_empty());
            Ok(())
        },
    )
}

/// Width or height that follows the component's children.
pub const FIT_CONTENTS: f32 = -1.0;
/// Width or height that follows the parent, or the scene for a pane.
pub const FILL_PARENT: f32 = -2.0;

#[derive(Clone, Copy, Debug)]
pub(crate) enum Axis {
    Width,
    Height,
}

impl Axis {
    fn size(self, r: &Rect) -> f32 {
        match self {
            Axis::Width => r.w,
            Axis::Height => r.h,
        }
    }

    fn size_mut(self, r: &mut Rect) -> &mut f32 {
        match self {
            Axis::Width => &mut r.w,
            Axis::Height => &mut r.h,
        }
    }

    fn offset(self, r: &Rect) -> f32 {
        match self {
            Axis::Width => r.x,
            Axis::Height => r.y,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Axis::Width => "width",
            Axis::Height => "height",
        }
    }
}

/// Reads the resolved size, stores what was written.
fn extent(id: NodeId, axis: Axis) -> Accessor<Scene> {
    Accessor::new(
        move |s: &Scene| Ok(Value::from(s.extent(id, axis)?)),
        move |s: &mut Scene, v| {
            let size: f32 = parse(axis.name(), v)?;
            *axis.size_mut(&mut s.node_mut(id)?.rect) = size;
            s.book_redraw();
            Ok(())
        },
    )
}

impl Scene {
    /// Local rectangle of `id` with [`FIT_CONTENTS`] and [`FILL_PARENT`]
    /// sizes resolved.
    pub fn bounds(&self, id: NodeId) -> Result<Rect> {
        Ok(Rect {
            w: self.extent(id, Axis::Width)?,
            h: self.extent(id, Axis::Height)?,
            ..self.node(id)?.rect
        })
    }

    pub(crate) fn extent(&self, id: NodeId, axis: Axis) -> Result<f32> {
        let node = self.node(id)?;
        let raw = axis.size(&node.rect);
        if raw == FILL_PARENT {
            return match node.parent {
                Some(parent) => self.extent(parent, axis),
                None => Ok(match axis {
                    Axis::Width => self.settings().width,
                    Axis::Height => self.settings().height,
                }),
            };
        }
        if raw != FIT_CONTENTS {
            return Ok(raw);
        }
        // children that fill this node would recurse back into it
        let mut far = 0.0f32;
        for child in self.children(id) {
            let rect = self.node(child)?.rect;
            let size = if axis.size(&rect) == FILL_PARENT {
                0.0
            } else {
                self.extent(child, axis)?
            };
            far = far.max(axis.offset(&rect) + size);
        }
        Ok(far)
    }
}

fn redraw(s: &mut Scene) -> Result<()> {
    s.book_redraw();
    Ok(())
}

/// Maps the properties every component has.
pub fn install_component(scene: &mut Scene, id: NodeId) -> Result<()> {
    scene.map_property(id, "name", fixed(id, "name", |c| c.name.as_str()), &[])?;
    scene.map_property(id, "type", fixed(id, "type", |c| c.type_tag.as_str()), &[])?;

    scene.map_property(
        id,
        "x",
        node_field(id, |c| &c.rect.x, |c| &mut c.rect.x).after_set(redraw),
        &[],
    )?;
    scene.map_property(
        id,
        "y",
        node_field(id, |c| &c.rect.y, |c| &mut c.rect.y).after_set(redraw),
        &[],
    )?;
    scene.map_property(id, "width", extent(id, Axis::Width), &[])?;
    scene.map_property(id, "height", extent(id, Axis::Height), &[])?;
    scene.map_property(
        id,
        "alpha",
        node_field(id, |c| &c.alpha, |c| &mut c.alpha).after_set(redraw),
        &[],
    )?;
    scene.map_property(
        id,
        "layer",
        Accessor::write_only(move |s: &mut Scene, v| {
            let alter: String = parse("layer", v)?;
            s.request_layer(id, alter)
        }),
        &[],
    )?;

    scene.map_property(
        id,
        "visible",
        flag(id, NodeFlags::VISIBLE, "visible").after_set(redraw),
        &[],
    )?;
    scene.map_property(id, "enabled", flag(id, NodeFlags::ENABLED, "enabled"), &[])?;
    scene.map_property(id, "locked", flag(id, NodeFlags::LOCKED, "locked"), &[])?;
    scene.map_property(
        id,
        "deleted",
        Accessor::new(
            move |s: &Scene| Ok(Value::Bool(s.node(id)?.is_deleted())),
            move |s: &mut Scene, v| {
                if parse::<bool>("deleted", v)? {
                    s.delete(id)
                } else {
                    if s.node(id)?.is_deleted() {
                        log::warn!("cannot undelete `{}`", s.full_path(id)?);
                    }
                    Ok(())
                }
            },
        ),
        &[],
    )?;

    for dir in Dir::ALL {
        let name = format!("{}Flow", dir.as_str());
        scene.map_property(id, &name, flow_link(id, dir), &[])?;
    }

    scene.map_property(
        id,
        "paint",
        Accessor::new(
            move |s: &Scene| Ok(Value::Object(s.node(id)?.paint.clone())),
            move |s: &mut Scene, v| {
                let entries = match v {
                    Value::Object(entries) => entries,
                    other => {
                        return Err(Error::PropertyValue {
                            name: "paint".into(),
                            reason: format!("expected an object, got {other}"),
                        });
                    }
                };
                let paint = &mut s.node_mut(id)?.paint;
                for (k, v) in entries {
                    if v.is_null() {
                        paint.remove(&k);
                    } else {
                        paint.insert(k, v);
                    }
                }
                Ok(())
            },
        )
        .after_set(redraw),
        &[],
    )?;

    scene.map_property(
        id,
        "extras",
        Accessor::write_only(move |s: &mut Scene, v| s.modify_extras(id, &v)),
        &[],
    )?;
    Ok(())
}

//! Extras: named behaviors attached to a component.
//!
//! An extra is configured through its own property mapper, announces itself
//! with `on_start` once built and configured, and always fires `on_delete`
//! before it is dropped, whether it was detached explicitly, replaced, or
//! reaped along with its owner.

pub mod die;
pub mod effect;
pub mod fade;
pub mod slide;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::rc::Rc;

use arbor_core::{Accessor, Error, EventDispatcher, Mode, PropertyMapper, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::config::{as_object, type_of};
use crate::node::NodeId;
use crate::registry;
use crate::scene::Scene;

slotmap::new_key_type! {
    pub struct ExtraId;
}

pub struct Extra {
    pub(crate) owner: NodeId,
    pub(crate) name: String,
    pub(crate) type_tag: String,
    pub(crate) mapper: Rc<PropertyMapper<Scene>>,
    pub(crate) on_start: EventDispatcher<ExtraId, Scene>,
    pub(crate) on_delete: EventDispatcher<ExtraId, Scene>,
    state: HashMap<TypeId, Box<dyn Any>>,
    pub(crate) started: bool,
    pub(crate) detaching: bool,
}

impl Extra {
    fn new(owner: NodeId, name: &str, type_tag: &str) -> Self {
        Self {
            owner,
            name: name.to_string(),
            type_tag: type_tag.to_string(),
            mapper: Rc::new(PropertyMapper::new(name)),
            on_start: EventDispatcher::new(format!("{name}.on_start"), Mode::None),
            on_delete: EventDispatcher::new(format!("{name}.on_delete"), Mode::None),
            state: HashMap::new(),
            started: false,
            detaching: false,
        }
    }

    pub fn owner(&self) -> NodeId {
        self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn on_start(&self) -> &EventDispatcher<ExtraId, Scene> {
        &self.on_start
    }

    pub fn on_delete(&self) -> &EventDispatcher<ExtraId, Scene> {
        &self.on_delete
    }

    /// `on_start` has fired.
    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn state<S: 'static>(&self) -> Option<&S> {
        self.state.get(&TypeId::of::<S>())?.downcast_ref()
    }

    pub fn state_mut<S: 'static>(&mut self) -> Option<&mut S> {
        self.state.get_mut(&TypeId::of::<S>())?.downcast_mut()
    }

    /// Stores typed state. Extra types built on another keep both states.
    pub fn insert_state<S: 'static>(&mut self, state: S) {
        self.state.insert(TypeId::of::<S>(), Box::new(state));
    }
}

/// Typed field of state `S` on the extra behind `id`.
pub fn extra_field<S, F>(
    id: ExtraId,
    lens: fn(&S) -> &F,
    lens_mut: fn(&mut S) -> &mut F,
) -> Accessor<Scene>
where
    S: 'static,
    F: Serialize + DeserializeOwned + 'static,
{
    Accessor::field(
        move |s: &Scene| s.extras.get(id).and_then(|e| e.state::<S>()).map(lens),
        move |s: &mut Scene| s.extras.get_mut(id).and_then(|e| e.state_mut::<S>()).map(lens_mut),
    )
}

fn fixed(id: ExtraId, name: &'static str, read: fn(&Extra) -> &str) -> Accessor<Scene> {
    Accessor::new(
        move |s: &Scene| Ok(Value::String(read(s.extra_ref(id)?).to_string())),
        move |s: &mut Scene, v| {
            let current = read(s.extra_ref(id)?);
            match v.as_str() {
                Some(given) if given == current => Ok(()),
                _ => Err(Error::Config(format!(
                    "`{name}` of extra `{current}` cannot be changed to {v}"
                ))),
            }
        },
    )
}

impl Scene {
    pub fn extra_ref(&self, id: ExtraId) -> Result<&Extra> {
        self.extras
            .get(id)
            .ok_or_else(|| Error::StaleNode(format!("{id:?}")))
    }

    pub fn extra_mut(&mut self, id: ExtraId) -> Result<&mut Extra> {
        self.extras
            .get_mut(id)
            .ok_or_else(|| Error::StaleNode(format!("{id:?}")))
    }

    pub fn extra_state<S: 'static>(&self, id: ExtraId) -> Result<&S> {
        let extra = self.extra_ref(id)?;
        extra.state::<S>().ok_or_else(|| {
            Error::Config(format!(
                "extra `{}` ({}) has no {} state",
                extra.name,
                extra.type_tag,
                std::any::type_name::<S>()
            ))
        })
    }

    pub fn extra_state_mut<S: 'static>(&mut self, id: ExtraId) -> Result<&mut S> {
        let extra = self.extra_mut(id)?;
        let label = format!("extra `{}` ({})", extra.name, extra.type_tag);
        extra.state_mut::<S>().ok_or_else(|| {
            Error::Config(format!("{label} has no {} state", std::any::type_name::<S>()))
        })
    }

    pub fn map_extra_property(
        &mut self,
        id: ExtraId,
        name: &str,
        accessor: Accessor<Scene>,
        dependents: &[&str],
    ) -> Result<()> {
        let extra = self.extra_mut(id)?;
        let label = extra.name.clone();
        let busy = || Error::InvariantViolation(format!("mapper of extra `{label}` is in use"));
        Rc::get_mut(&mut extra.mapper)
            .ok_or_else(busy)?
            .map(name, accessor, dependents)
    }

    pub fn set_extra(&mut self, id: ExtraId, name: &str, value: Value) -> Result<()> {
        let mapper = self.extra_ref(id)?.mapper.clone();
        mapper.set(self, name, value)
    }

    pub fn extra_prop(&self, id: ExtraId, name: &str) -> Result<Value> {
        self.extra_ref(id)?.mapper.get(self, name)
    }

    pub fn configure_extra(&mut self, id: ExtraId, config: &Value) -> Result<()> {
        let name = self.extra_ref(id)?.name.clone();
        self.configure_extra_props(id, as_object(&name, config)?)
    }

    fn configure_extra_props(&mut self, id: ExtraId, props: &Map<String, Value>) -> Result<()> {
        let mapper = self.extra_ref(id)?.mapper.clone();
        mapper.mass_set(self, props)
    }

    pub fn bundle_extra(&self, id: ExtraId) -> Result<Map<String, Value>> {
        self.extra_ref(id)?.mapper.mass_get(self)
    }

    /// Builds extra `tag` on `owner` under `name`, applies `config`, then
    /// fires `on_start`. An extra already attached under `name` is detached
    /// first. If building fails the new extra is detached again.
    pub fn attach(
        &mut self,
        owner: NodeId,
        name: &str,
        tag: &str,
        config: &Value,
    ) -> Result<ExtraId> {
        let props = as_object(name, config)?;
        let ctor = registry::extra_ctor(tag)?;
        if !self.is_live(owner) {
            return Err(Error::StaleNode(format!("owner of extra `{name}`")));
        }
        if self.extra(owner, name).is_some() {
            self.detach(owner, name)?;
        }

        let id = self.extras.insert(Extra::new(owner, name, tag));
        self.node_mut(owner)?.extras.push((name.to_string(), id));
        let built = self
            .map_extra_property(id, "name", fixed(id, "name", |e| e.name.as_str()), &[])
            .and_then(|()| {
                let tag = fixed(id, "type", |e| e.type_tag.as_str());
                self.map_extra_property(id, "type", tag, &[])
            })
            .and_then(|()| ctor(self, id))
            .and_then(|()| self.configure_extra_props(id, props));
        if let Err(e) = built {
            if let Err(cleanup) = self.detach_extra(id) {
                log::warn!("cleanup of extra `{name}` failed: {cleanup}");
            }
            return Err(e);
        }

        let extra = self.extra_mut(id)?;
        extra.started = true;
        let on_start = extra.on_start.clone();
        log::debug!("attached extra `{name}` ({tag}) to {}", self.full_path(owner)?);
        on_start.fire(self, id)?;
        Ok(id)
    }

    /// Fires `on_delete` and removes the extra. Detaching from inside its own
    /// `on_delete` is a no-op. Returns whether an extra was removed.
    pub fn detach(&mut self, owner: NodeId, name: &str) -> Result<bool> {
        match self.extra(owner, name) {
            Some(id) => self.detach_extra(id),
            None => Ok(false),
        }
    }

    pub fn detach_extra(&mut self, id: ExtraId) -> Result<bool> {
        let Some(extra) = self.extras.get_mut(id) else {
            return Ok(false);
        };
        if extra.detaching {
            return Ok(false);
        }
        extra.detaching = true;
        let (owner, on_delete) = (extra.owner, extra.on_delete.clone());
        let fired = on_delete.fire(self, id);

        if let Some(node) = self.nodes.get_mut(owner) {
            node.extras.retain(|(_, e)| *e != id);
        }
        if let Some(extra) = self.extras.remove(id) {
            log::debug!("detached extra `{}` ({})", extra.name, extra.type_tag);
        }
        fired.map(|_| true)
    }

    /// Applies `{ name: config }` to the extras of `owner`: existing extras
    /// of the same type are reconfigured, others are attached (and need a
    /// `type`), `null` detaches.
    pub fn modify_extras(&mut self, owner: NodeId, extras: &Value) -> Result<()> {
        for (name, config) in as_object("extras", extras)? {
            if config.is_null() {
                self.detach(owner, name)?;
                continue;
            }
            let reuse = match self.extra(owner, name) {
                Some(id) => {
                    let current = &self.extra_ref(id)?.type_tag;
                    type_of(config).is_none_or(|t| t == current).then_some(id)
                }
                None => None,
            };
            match reuse {
                Some(id) => self.configure_extra(id, config)?,
                None => {
                    let tag = type_of(config).ok_or_else(|| Error::MissingType {
                        name: name.to_string(),
                    })?;
                    self.attach(owner, name, tag, config)?;
                }
            }
        }
        Ok(())
    }

    /// Extra attached to `owner` under `name`, ignoring one mid-detach.
    pub fn extra(&self, owner: NodeId, name: &str) -> Option<ExtraId> {
        self.get(owner)?
            .extras
            .iter()
            .find(|(n, id)| n == name && self.extras.get(*id).is_some_and(|e| !e.detaching))
            .map(|&(_, id)| id)
    }

    pub fn extra_by_type(&self, owner: NodeId, tag: &str) -> Option<ExtraId> {
        self.get(owner)?
            .extras
            .iter()
            .map(|&(_, id)| id)
            .find(|&id| self.extras.get(id).is_some_and(|e| !e.detaching && e.type_tag == tag))
    }

    /// First extra of type `tag` on `id` or its nearest ancestor that has one.
    pub fn extra_by_type_from_parents(&self, id: NodeId, tag: &str) -> Option<(NodeId, ExtraId)> {
        let mut cur = Some(id);
        while let Some(node) = cur {
            if let Some(extra) = self.extra_by_type(node, tag) {
                return Some((node, extra));
            }
            cur = self.get(node)?.parent;
        }
        None
    }
}

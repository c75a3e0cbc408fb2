use arbor_core::{Accessor, Error, Result};
use serde_json::Value;
use smallvec::SmallVec;

use crate::config::{as_object, type_of};
use crate::group::install_group;
use crate::node::{NodeFlags, NodeId, parse};
use crate::registry;
use crate::scene::Scene;

/// A group that can be registered as a scene root.
pub fn install_pane(scene: &mut Scene, id: NodeId) -> Result<()> {
    install_group(scene, id)?;
    scene.node_mut(id)?.flags.insert(NodeFlags::PANE);
    scene.map_property(
        id,
        "active",
        Accessor::new(
            move |s: &Scene| Ok(Value::Bool(s.node(id)?.is_active())),
            move |s: &mut Scene, v| {
                if parse::<bool>("active", v)? {
                    s.activate(id)
                } else {
                    if s.node(id)?.is_active() {
                        log::warn!(
                            "{} stays active until another pane is activated",
                            s.full_path(id)?
                        );
                    }
                    Ok(())
                }
            },
        ),
        &[],
    )
}

impl Scene {
    /// Returns the pane `name`, creating it first if needed, and applies
    /// `config` to it. New panes default to the scene size and type `Pane`.
    pub fn create_pane(&mut self, name: &str, config: &Value) -> Result<NodeId> {
        let props = as_object(name, config)?;
        if let Some(existing) = self.get_pane(name) {
            self.configure_props(existing, props)?;
            return Ok(existing);
        }

        let tag = type_of(config).unwrap_or("Pane");
        let ctor = registry::component_ctor(tag)?;
        let previous = self.active_pane.filter(|&p| self.is_live(p));
        let id = self.alloc(name, tag, None);
        let settings = self.settings();
        let node = self.node_mut(id)?;
        node.rect.w = settings.width;
        node.rect.h = settings.height;

        let built = ctor(self, id).and_then(|()| {
            if self.node(id)?.is_pane() {
                self.register_pane(name, id)?;
                self.configure_props(id, props)
            } else {
                Err(Error::Config(format!("`{tag}` cannot be used as a pane")))
            }
        });
        if let Err(e) = built {
            if let Err(cleanup) = self.remove_now(id) {
                log::warn!("cleanup of pane `{name}` failed: {cleanup}");
            }
            // `active: true` may have run before the failure
            if let Some(p) = previous
                && self.is_live(p)
                && self.active_pane != previous
                && let Err(restore) = self.activate(p)
            {
                log::warn!("could not reactivate the previous pane: {restore}");
            }
            return Err(e);
        }
        log::debug!("created pane `{name}` ({tag})");
        Ok(id)
    }

    /// Registers a root built as a pane under `name`.
    pub fn register_pane(&mut self, name: &str, id: NodeId) -> Result<()> {
        let node = self.node(id)?;
        if node.parent.is_some() || !node.is_pane() {
            return Err(Error::Config(format!(
                "`{}` is not a pane root",
                node.name
            )));
        }
        match self.get_pane(name) {
            Some(existing) if existing == id => return Ok(()),
            Some(_) => {
                return Err(Error::Config(format!("pane `{name}` is already registered")));
            }
            None => {}
        }
        self.node_mut(id)?.name = name.to_string();
        self.panes.push((name.to_string(), id));
        Ok(())
    }

    pub fn get_pane(&self, name: &str) -> Option<NodeId> {
        self.panes
            .iter()
            .find(|(n, id)| n == name && self.is_live(*id))
            .map(|&(_, id)| id)
    }

    /// Registered pane names in registration order.
    pub fn panes(&self) -> impl Iterator<Item = &str> + '_ {
        self.panes.iter().map(|(n, _)| n.as_str())
    }

    /// Makes `name` the only active pane. Both panes' flags change before any
    /// `active_change` listener runs, so listeners never observe two active
    /// panes or none.
    pub fn set_active_pane(&mut self, name: &str) -> Result<()> {
        let pane = self
            .get_pane(name)
            .ok_or_else(|| Error::path_not_found(format!("{name}:"), format!("{name}:")))?;
        self.activate(pane)
    }

    /// Activates a registered, live pane. A deleted pane is refused with
    /// `StaleNode` and the current active pane is kept.
    pub fn activate(&mut self, pane: NodeId) -> Result<()> {
        if !self.is_live(pane) {
            return Err(Error::StaleNode(format!(
                "pane `{}` is deleted",
                self.get(pane).map_or("?", |n| n.name.as_str())
            )));
        }
        if !self.panes.iter().any(|&(_, id)| id == pane) {
            return Err(Error::Config(format!(
                "`{}` is not a registered pane",
                self.node(pane)?.name
            )));
        }
        let previous = self.active_pane.filter(|&p| self.is_live(p));
        if previous == Some(pane) {
            return Ok(());
        }

        let deactivated = previous.map(|p| self.focus_chain(p)).unwrap_or_default();
        let activated = self.focus_chain(pane);
        for &n in &deactivated {
            self.node_mut(n)?.flags.remove(NodeFlags::ACTIVE);
        }
        for &n in &activated {
            self.node_mut(n)?.flags.insert(NodeFlags::ACTIVE);
        }
        self.active_pane = Some(pane);
        log::debug!("active pane: {}", self.full_path(pane)?);

        for n in deactivated {
            self.fire_flag(n, |l| &l.active_change, false)?;
        }
        for n in activated {
            self.fire_flag(n, |l| &l.active_change, true)?;
        }
        self.book_redraw();
        Ok(())
    }

    /// The active pane, after checking that it is the only pane flagged
    /// active.
    pub fn active_pane(&self) -> Result<Option<NodeId>> {
        let flagged: SmallVec<[NodeId; 2]> = self
            .panes
            .iter()
            .map(|&(_, id)| id)
            .filter(|&id| self.get(id).is_some_and(|n| !n.is_deleted() && n.is_active()))
            .collect();
        let current = self.active_pane.filter(|&p| self.is_live(p));
        match (current, flagged.as_slice()) {
            (None, []) => Ok(None),
            (Some(a), [b]) if a == *b => Ok(Some(a)),
            (current, flagged) => Err(Error::InvariantViolation(format!(
                "active pane is {current:?} but {} pane(s) are flagged active",
                flagged.len()
            ))),
        }
    }
}

//! Process-wide constructor tables consulted when configuration names a
//! `type`. Call [`initialize`] before applying any configuration.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};

use arbor_core::{Error, RegistryKind, Result};
use parking_lot::RwLock;

use crate::extras::{self, ExtraId};
use crate::group::install_group;
use crate::node::{NodeId, install_component};
use crate::pane::install_pane;
use crate::scene::Scene;

/// Installs a component type's properties and behavior on a fresh node.
pub type ComponentCtor = fn(&mut Scene, NodeId) -> Result<()>;
/// Installs an extra type's properties and behavior on a fresh extra.
pub type ExtraCtor = fn(&mut Scene, ExtraId) -> Result<()>;

static COMPONENTS: LazyLock<RwLock<HashMap<String, ComponentCtor>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));
static EXTRAS: LazyLock<RwLock<HashMap<String, ExtraCtor>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));
static INITIALIZED: AtomicBool = AtomicBool::new(false);

static BUILTIN_TYPES: [(&str, ComponentCtor); 3] = [
    ("Component", install_component),
    ("Group", install_group),
    ("Pane", install_pane),
];

static BUILTIN_EXTRAS: [(&str, ExtraCtor); 4] = [
    ("Effect", extras::effect::install_effect),
    ("Fade", extras::fade::install_fade),
    ("Slide", extras::slide::install_slide),
    ("Die", extras::die::install_die),
];

/// Registers the built-in component types and extras. Safe to call more
/// than once.
pub fn initialize() -> Result<()> {
    if INITIALIZED.load(Ordering::Acquire) {
        return Ok(());
    }
    for (tag, ctor) in BUILTIN_TYPES {
        register_type(tag, ctor)?;
    }
    for (tag, ctor) in BUILTIN_EXTRAS {
        register_extra(tag, ctor)?;
    }
    INITIALIZED.store(true, Ordering::Release);
    log::debug!(
        "registries initialized: {} types, {} extras",
        COMPONENTS.read().len(),
        EXTRAS.read().len()
    );
    Ok(())
}

/// Registering a tag again with the same constructor is a no-op; with a
/// different one it fails.
pub fn register_type(tag: &str, ctor: ComponentCtor) -> Result<()> {
    register(&COMPONENTS, RegistryKind::Component, tag, ctor, |a, b| {
        std::ptr::fn_addr_eq(a, b)
    })
}

pub fn register_extra(tag: &str, ctor: ExtraCtor) -> Result<()> {
    register(&EXTRAS, RegistryKind::Extra, tag, ctor, |a, b| {
        std::ptr::fn_addr_eq(a, b)
    })
}

fn register<F: Copy>(
    table: &RwLock<HashMap<String, F>>,
    kind: RegistryKind,
    tag: &str,
    ctor: F,
    same: fn(F, F) -> bool,
) -> Result<()> {
    let mut table = table.write();
    match table.get(tag) {
        Some(&existing) if same(existing, ctor) => Ok(()),
        Some(_) => Err(Error::DuplicateRegistration {
            kind,
            tag: tag.to_string(),
        }),
        None => {
            table.insert(tag.to_string(), ctor);
            Ok(())
        }
    }
}

pub fn component_ctor(tag: &str) -> Result<ComponentCtor> {
    COMPONENTS
        .read()
        .get(tag)
        .copied()
        .ok_or_else(|| Error::TypeNotRegistered {
            kind: RegistryKind::Component,
            tag: tag.to_string(),
        })
}

pub fn extra_ctor(tag: &str) -> Result<ExtraCtor> {
    EXTRAS
        .read()
        .get(tag)
        .copied()
        .ok_or_else(|| Error::TypeNotRegistered {
            kind: RegistryKind::Extra,
            tag: tag.to_string(),
        })
}

pub fn is_type_registered(tag: &str) -> bool {
    COMPONENTS.read().contains_key(tag)
}

pub fn is_extra_registered(tag: &str) -> bool {
    EXTRAS.read().contains_key(tag)
}

//! # Property mapping
//!
//! A `PropertyMapper<T>` maps external property names (the keys of a
//! configuration object) onto accessors over some target `T`. Each mapping
//! may name *dependents*: properties recomputed after it is set.
//!
//! ```rust
//! use arbor_core::{Accessor, PropertyMapper};
//! use serde_json::json;
//!
//! #[derive(Default)]
//! struct Box2 { w: f32, h: f32, area: f32 }
//!
//! let mut m: PropertyMapper<Box2> = PropertyMapper::new("box");
//! let w = Accessor::field(|b: &Box2| Some(&b.w), |b: &mut Box2| Some(&mut b.w));
//! let h = Accessor::field(|b: &Box2| Some(&b.h), |b: &mut Box2| Some(&mut b.h));
//! m.map("w", w, &["area"]).unwrap();
//! m.map("h", h, &["area"]).unwrap();
//! m.map(
//!     "area",
//!     Accessor::new(|b: &Box2| Ok(json!(b.area)), |_, _| Ok(()))
//!         .with_recompute(|b: &mut Box2| { b.area = b.w * b.h; Ok(()) }),
//!     &[],
//! ).unwrap();
//!
//! let mut b = Box2::default();
//! m.mass_set(&mut b, json!({ "w": 2.0, "h": 3.0 }).as_object().unwrap()).unwrap();
//! assert_eq!(b.area, 6.0);
//! ```
//!
//! Cycles among dependents are rejected when the mapping is registered.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use smallvec::SmallVec;

use crate::error::{Error, PropertyOp, Result};

type Getter<T> = Rc<dyn Fn(&T) -> Result<Value>>;
type Setter<T> = Rc<dyn Fn(&mut T, &str, Value) -> Result<()>>;
type Hook<T> = Rc<dyn Fn(&mut T) -> Result<()>>;

pub struct Accessor<T> {
    get: Option<Getter<T>>,
    set: Setter<T>,
    after_set: Option<Hook<T>>,
    recompute: Option<Hook<T>>,
}

impl<T: 'static> Accessor<T> {
    pub fn new(
        get: impl Fn(&T) -> Result<Value> + 'static,
        set: impl Fn(&mut T, Value) -> Result<()> + 'static,
    ) -> Self {
        Self {
            get: Some(Rc::new(get)),
            set: Rc::new(move |t: &mut T, _: &str, v: Value| set(t, v)),
            after_set: None,
            recompute: None,
        }
    }

    /// Setter-only mapping; `get` yields `null` and `mass_get` skips it.
    pub fn write_only(set: impl Fn(&mut T, Value) -> Result<()> + 'static) -> Self {
        Self {
            get: None,
            set: Rc::new(move |t: &mut T, _: &str, v: Value| set(t, v)),
            after_set: None,
            recompute: None,
        }
    }

    /// Field-backed mapping. Values are converted with serde; a lens returning
    /// `None` means the target no longer holds the field.
    pub fn field<F>(
        lens: impl Fn(&T) -> Option<&F> + 'static,
        lens_mut: impl Fn(&mut T) -> Option<&mut F> + 'static,
    ) -> Self
    where
        F: Serialize + DeserializeOwned + 'static,
    {
        Self {
            get: Some(Rc::new(move |t: &T| {
                let field = lens(t).ok_or_else(|| Error::StaleNode("field target".into()))?;
                serde_json::to_value(field).map_err(|e| Error::PropertyValue {
                    name: String::new(),
                    reason: e.to_string(),
                })
            })),
            set: Rc::new(move |t: &mut T, name: &str, v: Value| {
                let parsed: F = serde_json::from_value(v).map_err(|e| Error::PropertyValue {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
                let field = lens_mut(t).ok_or_else(|| Error::StaleNode(name.to_string()))?;
                *field = parsed;
                Ok(())
            }),
            after_set: None,
            recompute: None,
        }
    }

    /// Runs after every successful direct set (not after recomputes).
    pub fn after_set(mut self, f: impl Fn(&mut T) -> Result<()> + 'static) -> Self {
        self.after_set = Some(Rc::new(f));
        self
    }

    /// Replaces the default recompute, which re-applies the current value
    /// through the setter.
    pub fn with_recompute(mut self, f: impl Fn(&mut T) -> Result<()> + 'static) -> Self {
        self.recompute = Some(Rc::new(f));
        self
    }
}

struct Mapping<T> {
    name: String,
    accessor: Accessor<T>,
    dependents: SmallVec<[String; 2]>,
}

pub struct PropertyMapper<T> {
    label: String,
    entries: Vec<Mapping<T>>,
    index: HashMap<String, usize>,
}

impl<T: 'static> PropertyMapper<T> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Maps `name`. Mapping an existing name replaces its accessor and
    /// dependents in place.
    pub fn map(&mut self, name: &str, accessor: Accessor<T>, dependents: &[&str]) -> Result<()> {
        let dependents: SmallVec<[String; 2]> = dependents.iter().map(|d| d.to_string()).collect();
        let previous = match self.index.get(name) {
            Some(&i) => Some(std::mem::replace(
                &mut self.entries[i],
                Mapping {
                    name: name.to_string(),
                    accessor,
                    dependents,
                },
            )),
            None => {
                self.index.insert(name.to_string(), self.entries.len());
                self.entries.push(Mapping {
                    name: name.to_string(),
                    accessor,
                    dependents,
                });
                None
            }
        };

        if let Some(chain) = self.find_cycle(name) {
            match previous {
                Some(prev) => {
                    let i = self.index[name];
                    self.entries[i] = prev;
                }
                None => {
                    self.entries.pop();
                    self.index.remove(name);
                }
            }
            return Err(Error::DependencyCycle { chain });
        }
        Ok(())
    }

    pub fn add_dependents(&mut self, name: &str, dependents: &[&str]) -> Result<()> {
        let i = *self
            .index
            .get(name)
            .ok_or_else(|| Error::missing(name, PropertyOp::AddDependents))?;
        let before = self.entries[i].dependents.len();
        for d in dependents {
            if !self.entries[i].dependents.iter().any(|e| e.as_str() == *d) {
                self.entries[i].dependents.push(d.to_string());
            }
        }
        if let Some(chain) = self.find_cycle(name) {
            self.entries[i].dependents.truncate(before);
            return Err(Error::DependencyCycle { chain });
        }
        Ok(())
    }

    pub fn is_mapped(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|m| m.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, target: &T, name: &str) -> Result<Value> {
        let m = self.mapping(name, PropertyOp::Get)?;
        match &m.accessor.get {
            Some(get) => get(target).map_err(|e| name_value_error(e, name)),
            None => Ok(Value::Null),
        }
    }

    /// Sets one property, then recomputes its transitive dependents.
    pub fn set(&self, target: &mut T, name: &str, value: Value) -> Result<()> {
        self.set_direct(target, name, value)?;
        self.recompute(target, &[name])
    }

    /// Sets every key in document order, then recomputes the union of their
    /// dependents once, so recomputes observe the whole batch.
    pub fn mass_set(&self, target: &mut T, props: &Map<String, Value>) -> Result<()> {
        for (k, v) in props {
            self.set_direct(target, k, v.clone())?;
        }
        let roots: SmallVec<[&str; 8]> = props.keys().map(String::as_str).collect();
        self.recompute(target, &roots)
    }

    /// Readable mappings with their current values, in mapping order.
    pub fn mass_get(&self, target: &T) -> Result<Map<String, Value>> {
        let mut out = Map::new();
        for m in &self.entries {
            if let Some(get) = &m.accessor.get {
                out.insert(
                    m.name.clone(),
                    get(target).map_err(|e| name_value_error(e, &m.name))?,
                );
            }
        }
        Ok(out)
    }

    fn set_direct(&self, target: &mut T, name: &str, value: Value) -> Result<()> {
        let m = self.mapping(name, PropertyOp::Set)?;
        (m.accessor.set)(target, name, value)?;
        if let Some(after) = &m.accessor.after_set {
            after(target)?;
        }
        Ok(())
    }

    fn recompute(&self, target: &mut T, roots: &[&str]) -> Result<()> {
        for name in self.plan(roots) {
            let m = self.mapping(&name, PropertyOp::Recompute)?;
            if let Some(hook) = &m.accessor.recompute {
                hook(target)?;
            } else if let Some(get) = &m.accessor.get {
                let current = get(target).map_err(|e| name_value_error(e, &name))?;
                (m.accessor.set)(target, &name, current)?;
            } else {
                log::trace!("{}: `{name}` is write-only, nothing to recompute", self.label);
            }
        }
        Ok(())
    }

    /// Topological order over every property reachable from `roots` through
    /// dependents. Each appears once.
    fn plan(&self, roots: &[&str]) -> Vec<String> {
        let mut affected: Vec<String> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = roots.iter().copied().collect();
        while let Some(n) = queue.pop_front() {
            for d in self.dependents_of(n) {
                if seen.insert(d.as_str()) {
                    affected.push(d.clone());
                    queue.push_back(d.as_str());
                }
            }
        }

        let mut indegree: HashMap<&str, usize> = affected.iter().map(|a| (a.as_str(), 0)).collect();
        for a in &affected {
            for d in self.dependents_of(a) {
                if let Some(n) = indegree.get_mut(d.as_str()) {
                    *n += 1;
                }
            }
        }

        let mut order = Vec::with_capacity(affected.len());
        let mut emitted: HashSet<&str> = HashSet::new();
        while order.len() < affected.len() {
            let Some(next) = affected
                .iter()
                .find(|a| !emitted.contains(a.as_str()) && indegree[a.as_str()] == 0)
            else {
                // unreachable while map-time cycle checks hold
                log::error!("{}: dependents of {roots:?} do not form a DAG", self.label);
                break;
            };
            emitted.insert(next.as_str());
            for d in self.dependents_of(next) {
                if let Some(n) = indegree.get_mut(d.as_str()) {
                    *n -= 1;
                }
            }
            order.push(next.clone());
        }
        order
    }

    fn dependents_of(&self, name: &str) -> &[String] {
        self.index
            .get(name)
            .map(|&i| self.entries[i].dependents.as_slice())
            .unwrap_or(&[])
    }

    fn mapping(&self, name: &str, op: PropertyOp) -> Result<&Mapping<T>> {
        self.index
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| Error::missing(name, op))
    }

    fn find_cycle(&self, start: &str) -> Option<Vec<String>> {
        let mut trail = vec![start.to_string()];
        let mut seen = HashSet::new();
        self.reaches(start, start, &mut trail, &mut seen)
            .then_some(trail)
    }

    fn reaches<'a>(
        &'a self,
        from: &str,
        target: &str,
        trail: &mut Vec<String>,
        seen: &mut HashSet<&'a str>,
    ) -> bool {
        for d in self.dependents_of(from) {
            trail.push(d.clone());
            if d == target {
                return true;
            }
            if seen.insert(d.as_str()) && self.reaches(d, target, trail, seen) {
                return true;
            }
            trail.pop();
        }
        false
    }
}

fn name_value_error(e: Error, name: &str) -> Error {
    match e {
        Error::PropertyValue { name: n, reason } if n.is_empty() => Error::PropertyValue {
            name: name.to_string(),
            reason,
        },
        other => other,
    }
}

impl<T> fmt::Debug for PropertyMapper<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyMapper")
            .field("label", &self.label)
            .field(
                "names",
                &self.entries.iter().map(|m| &m.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

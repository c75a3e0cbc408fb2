//! # Event dispatchers
//!
//! An `EventDispatcher<E, C>` is a named channel whose listeners are combined
//! according to a [`Mode`]:
//!
//! - `None`: every matching listener runs, replies are ignored.
//! - `And`: stops at the first falsy reply and returns `false`.
//! - `Or`: stops at the first truthy reply and returns `true`.
//! - `Pass`: each `Reply::Event` replaces the event handed to the next
//!   listener; the final event is returned.
//! - `Last`: listeners run most-recent-first; the reply of the most recently
//!   registered listener that answered anything is returned.
//!
//! A listener may also carry a scalar tag. When an event is fired with a tag
//! value, tagged listeners only run if the two satisfy the dispatcher's
//! [`TagMatch`]; untagged listeners and untagged firings skip the check.
//!
//! Listeners receive a mutable context `C` alongside the event. Free-standing
//! buses use `()`; tree lifecycle buses pass the scene so that a listener can
//! restructure the tree while the event is in flight.
//!
//! ```rust
//! use arbor_core::{EventDispatcher, Mode, Reply};
//!
//! let bus: EventDispatcher<i32> = EventDispatcher::new("double", Mode::Pass);
//! bus.listen(|_, v| Ok(Reply::Event(v * 2)));
//! bus.listen(|_, v| Ok(Reply::Event(v + 1)));
//! assert_eq!(bus.fire(&mut (), 5).unwrap().into_event(), Some(11));
//! ```

use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value};
use smallvec::SmallVec;

use crate::Result;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    None,
    And,
    Or,
    Pass,
    Last,
}

/// How a listener's tag is compared with the tag an event is fired with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TagMatch {
    /// Tags must be equal.
    #[default]
    Equals,
    /// Integer tags must share at least one bit.
    Multi,
    /// The fired tag is an array containing the listener's tag.
    IsIn,
}

impl TagMatch {
    pub fn matches(self, fired: &Value, listener: &Value) -> bool {
        match self {
            TagMatch::Equals => fired == listener,
            TagMatch::Multi => match (fired.as_u64(), listener.as_u64()) {
                (Some(a), Some(b)) => a & b != 0,
                _ => false,
            },
            TagMatch::IsIn => fired
                .as_array()
                .is_some_and(|values| values.contains(listener)),
        }
    }
}

/// What a listener answered. `Unset` is "no opinion" and counts as falsy.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Reply<E> {
    #[default]
    Unset,
    Bool(bool),
    Event(E),
}

impl<E> Reply<E> {
    pub fn is_truthy(&self) -> bool {
        match self {
            Reply::Unset => false,
            Reply::Bool(b) => *b,
            Reply::Event(_) => true,
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Reply::Unset)
    }

    pub fn into_event(self) -> Option<E> {
        match self {
            Reply::Event(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<bool> for Reply<E> {
    fn from(b: bool) -> Self {
        Reply::Bool(b)
    }
}

/// Independent listener list on one dispatcher. The owner decides in which
/// order phases are fired.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Phase(Cow<'static, str>);

impl Phase {
    pub const BEFORE: Phase = Phase(Cow::Borrowed("before"));
    pub const COMPLETE: Phase = Phase(Cow::Borrowed("complete"));

    pub fn new(tag: impl Into<Cow<'static, str>>) -> Self {
        Phase(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Phase {
    fn default() -> Self {
        Phase::BEFORE
    }
}

/// Field lookup used by [`Filter`].
pub trait EventFields {
    fn field(&self, key: &str) -> Option<Value>;
}

impl EventFields for Value {
    fn field(&self, key: &str) -> Option<Value> {
        self.get(key).cloned()
    }
}

impl EventFields for () {
    fn field(&self, _key: &str) -> Option<Value> {
        None
    }
}

/// Key/value constraints a fired event must satisfy for a listener to run.
///
/// Every `require`d key must be present and equal; every `exclude`d key must
/// be absent or different.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    require: Map<String, Value>,
    exclude: Map<String, Value>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_object(require: Map<String, Value>) -> Self {
        Self {
            require,
            exclude: Map::new(),
        }
    }

    pub fn require(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.require.insert(key.into(), value.into());
        self
    }

    pub fn exclude(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.exclude.insert(key.into(), value.into());
        self
    }

    pub fn matches<E: EventFields + ?Sized>(&self, event: &E) -> bool {
        self.require
            .iter()
            .all(|(k, v)| event.field(k).as_ref() == Some(v))
            && self
                .exclude
                .iter()
                .all(|(k, v)| event.field(k).as_ref() != Some(v))
    }
}

pub type Listener<E, C = ()> = Rc<dyn Fn(&mut C, &E) -> Result<Reply<E>>>;

type Predicate<E> = Rc<dyn Fn(&E) -> bool>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration<E, C> {
    id: ListenerId,
    phase: Phase,
    filter: Option<Predicate<E>>,
    tag: Option<Value>,
    callback: Listener<E, C>,
    live: Cell<bool>,
}

impl<E, C> Registration<E, C> {
    fn accepts(&self, event: &E, fired: Option<(TagMatch, &Value)>) -> bool {
        let tagged = match (fired, &self.tag) {
            (Some((how, fired)), Some(own)) => how.matches(fired, own),
            _ => true,
        };
        self.live.get() && tagged && self.filter.as_ref().is_none_or(|f| f(event))
    }
}

struct Inner<E, C> {
    name: Cow<'static, str>,
    mode: Mode,
    tag_match: TagMatch,
    next_id: u64,
    entries: SmallVec<[Rc<Registration<E, C>>; 4]>,
}

/// Cloneable handle; clones share one listener list.
pub struct EventDispatcher<E, C = ()>(Rc<RefCell<Inner<E, C>>>);

impl<E, C> Clone for EventDispatcher<E, C> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<E: 'static, C: 'static> EventDispatcher<E, C> {
    pub fn new(name: impl Into<Cow<'static, str>>, mode: Mode) -> Self {
        Self(Rc::new(RefCell::new(Inner {
            name: name.into(),
            mode,
            tag_match: TagMatch::default(),
            next_id: 0,
            entries: SmallVec::new(),
        })))
    }

    pub fn name(&self) -> String {
        self.0.borrow().name.to_string()
    }

    pub fn mode(&self) -> Mode {
        self.0.borrow().mode
    }

    pub fn set_mode(&self, mode: Mode) {
        self.0.borrow_mut().mode = mode;
    }

    pub fn with_tag_match(self, how: TagMatch) -> Self {
        self.0.borrow_mut().tag_match = how;
        self
    }

    pub fn tag_match(&self) -> TagMatch {
        self.0.borrow().tag_match
    }

    /// Registers an unfiltered listener in the default phase.
    pub fn listen(
        &self,
        f: impl Fn(&mut C, &E) -> Result<Reply<E>> + 'static,
    ) -> ListenerId {
        self.register(Rc::new(f), None, None, Phase::BEFORE)
    }

    /// Registers a listener in the default phase that carries `tag`.
    pub fn listen_tagged(
        &self,
        f: impl Fn(&mut C, &E) -> Result<Reply<E>> + 'static,
        tag: impl Into<Value>,
    ) -> ListenerId {
        self.register(Rc::new(f), None, Some(tag.into()), Phase::BEFORE)
    }

    /// Registers a listener in `phase` that only runs for events matching `filter`.
    pub fn listen_with(
        &self,
        f: impl Fn(&mut C, &E) -> Result<Reply<E>> + 'static,
        filter: Option<Filter>,
        phase: Phase,
    ) -> ListenerId
    where
        E: EventFields,
    {
        self.register(Rc::new(f), filter.map(predicate), None, phase)
    }

    /// Registers a shared listener. Registering the same `Rc` again in the
    /// same phase replaces its filter and keeps its id and position.
    pub fn listen_shared(
        &self,
        f: Listener<E, C>,
        filter: Option<Filter>,
        phase: Phase,
    ) -> ListenerId
    where
        E: EventFields,
    {
        self.register(f, filter.map(predicate), None, phase)
    }

    fn register(
        &self,
        callback: Listener<E, C>,
        filter: Option<Predicate<E>>,
        tag: Option<Value>,
        phase: Phase,
    ) -> ListenerId {
        let mut inner = self.0.borrow_mut();
        if let Some(pos) = inner
            .entries
            .iter()
            .position(|r| r.phase == phase && Rc::ptr_eq(&r.callback, &callback))
        {
            let id = inner.entries[pos].id;
            inner.entries[pos].live.set(false);
            inner.entries[pos] = Rc::new(Registration {
                id,
                phase,
                filter,
                tag,
                callback,
                live: Cell::new(true),
            });
            return id;
        }
        let id = ListenerId(inner.next_id);
        inner.next_id += 1;
        inner.entries.push(Rc::new(Registration {
            id,
            phase,
            filter,
            tag,
            callback,
            live: Cell::new(true),
        }));
        id
    }

    /// Removes a listener. Safe to call from inside a firing; the removed
    /// listener is skipped if it has not run yet.
    pub fn unlisten(&self, id: ListenerId) -> bool {
        let mut inner = self.0.borrow_mut();
        match inner.entries.iter().position(|r| r.id == id) {
            Some(pos) => {
                inner.entries.remove(pos).live.set(false);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        for r in self.0.borrow_mut().entries.drain(..) {
            r.live.set(false);
        }
    }

    pub fn has_listeners(&self) -> bool {
        !self.0.borrow().entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_listeners()
    }

    /// Fires the default phase.
    pub fn fire(&self, ctx: &mut C, event: E) -> Result<Reply<E>> {
        self.fire_phase(ctx, &Phase::BEFORE, event)
    }

    /// Fires the default phase; tagged listeners must match `tag`.
    pub fn fire_tagged(&self, ctx: &mut C, event: E, tag: &Value) -> Result<Reply<E>> {
        self.dispatch(ctx, &Phase::BEFORE, event, Some(tag))
    }

    pub fn fire_phase(&self, ctx: &mut C, phase: &Phase, event: E) -> Result<Reply<E>> {
        self.dispatch(ctx, phase, event, None)
    }

    fn dispatch(
        &self,
        ctx: &mut C,
        phase: &Phase,
        event: E,
        tag: Option<&Value>,
    ) -> Result<Reply<E>> {
        let (mode, fired, snapshot) = {
            let inner = self.0.borrow();
            let snapshot: SmallVec<[Rc<Registration<E, C>>; 8]> = inner
                .entries
                .iter()
                .filter(|r| &r.phase == phase)
                .cloned()
                .collect();
            (inner.mode, tag.map(|t| (inner.tag_match, t)), snapshot)
        };

        match mode {
            Mode::None => {
                for r in &snapshot {
                    if r.accepts(&event, fired) {
                        (r.callback)(ctx, &event)?;
                    }
                }
                Ok(Reply::Unset)
            }
            Mode::And => {
                for r in &snapshot {
                    if r.accepts(&event, fired) && !(r.callback)(ctx, &event)?.is_truthy() {
                        return Ok(Reply::Bool(false));
                    }
                }
                Ok(Reply::Bool(true))
            }
            Mode::Or => {
                for r in &snapshot {
                    if r.accepts(&event, fired) && (r.callback)(ctx, &event)?.is_truthy() {
                        return Ok(Reply::Bool(true));
                    }
                }
                Ok(Reply::Bool(false))
            }
            Mode::Pass => {
                let mut current = event;
                for r in &snapshot {
                    if r.accepts(&current, fired)
                        && let Reply::Event(next) = (r.callback)(ctx, &current)?
                    {
                        current = next;
                    }
                }
                Ok(Reply::Event(current))
            }
            Mode::Last => {
                let mut last = Reply::Unset;
                for r in snapshot.iter().rev() {
                    if r.accepts(&event, fired) {
                        let reply = (r.callback)(ctx, &event)?;
                        if last.is_unset() {
                            last = reply;
                        }
                    }
                }
                Ok(last)
            }
        }
    }
}

fn predicate<E: EventFields + 'static>(filter: Filter) -> Predicate<E> {
    Rc::new(move |e: &E| filter.matches(e))
}

impl<E, C> fmt::Display for EventDispatcher<E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[EventDispatcher {}]", self.0.borrow().name)
    }
}

impl<E, C> fmt::Debug for EventDispatcher<E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.borrow();
        f.debug_struct("EventDispatcher")
            .field("name", &inner.name)
            .field("mode", &inner.mode)
            .field("listeners", &inner.entries.len())
            .finish()
    }
}

//! Frame-timed effects: wait `delay` frames, run for `duration` frames, then
//! chain into the extras named by `then` and, unless `noDelete`, detach.

use std::rc::Rc;

use arbor_core::{Accessor, EventDispatcher, ListenerId, Mode, Reply, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::extras::{ExtraId, extra_field};
use crate::node::parse;
use crate::scene::Scene;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EffectPhase {
    #[default]
    Idle,
    Delayed {
        remaining: u32,
    },
    Running {
        elapsed: u32,
    },
    Ended,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EffectTick {
    pub elapsed: u32,
    pub duration: u32,
}

impl EffectTick {
    pub fn progress(&self) -> f32 {
        if self.duration == 0 {
            1.0
        } else {
            self.elapsed as f32 / self.duration as f32
        }
    }
}

/// Runs once when an effect ends, unless its owner was deleted first.
pub type Continuation = Rc<dyn Fn(&mut Scene, ExtraId) -> Result<()>>;

pub struct EffectState {
    pub delay: u32,
    pub duration: u32,
    pub then: Vec<String>,
    pub no_delete: bool,
    autostart: bool,
    phase: EffectPhase,
    frame_listener: Option<ListenerId>,
    continuations: Vec<Continuation>,
    pub on_begin: EventDispatcher<EffectTick, Scene>,
    pub on_tick: EventDispatcher<EffectTick, Scene>,
    pub on_end: EventDispatcher<EffectTick, Scene>,
}

impl EffectState {
    fn new(name: &str) -> Self {
        Self {
            delay: 0,
            duration: 0,
            then: Vec::new(),
            no_delete: false,
            autostart: false,
            phase: EffectPhase::Idle,
            frame_listener: None,
            continuations: Vec::new(),
            on_begin: EventDispatcher::new(format!("{name}.on_begin"), Mode::None),
            on_tick: EventDispatcher::new(format!("{name}.on_tick"), Mode::None),
            on_end: EventDispatcher::new(format!("{name}.on_end"), Mode::None),
        }
    }

    pub fn phase(&self) -> EffectPhase {
        self.phase
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Names {
    One(String),
    Many(Vec<String>),
}

pub fn install_effect(scene: &mut Scene, id: ExtraId) -> Result<()> {
    let (owner, name) = {
        let extra = scene.extra_ref(id)?;
        (extra.owner, extra.name.clone())
    };
    scene.extra_mut(id)?.insert_state(EffectState::new(&name));

    scene.map_extra_property(
        id,
        "delay",
        extra_field::<EffectState, _>(id, |e| &e.delay, |e| &mut e.delay),
        &[],
    )?;
    scene.map_extra_property(
        id,
        "duration",
        extra_field::<EffectState, _>(id, |e| &e.duration, |e| &mut e.duration),
        &[],
    )?;
    scene.map_extra_property(
        id,
        "noDelete",
        extra_field::<EffectState, _>(id, |e| &e.no_delete, |e| &mut e.no_delete),
        &[],
    )?;
    scene.map_extra_property(
        id,
        "then",
        Accessor::new(
            move |s: &Scene| Ok(Value::from(s.effect(id)?.then.clone())),
            move |s: &mut Scene, v| {
                let then = match parse::<Option<Names>>("then", v)? {
                    None => Vec::new(),
                    Some(Names::One(n)) => vec![n],
                    Some(Names::Many(ns)) => ns,
                };
                s.effect_mut(id)?.then = then;
                Ok(())
            },
        ),
        &[],
    )?;
    scene.map_extra_property(
        id,
        "on",
        Accessor::new(
            move |s: &Scene| {
                let e = s.effect(id)?;
                Ok(Value::Bool(e.autostart || e.phase != EffectPhase::Idle))
            },
            move |s: &mut Scene, v| {
                if !parse::<bool>("on", v)? {
                    return Ok(());
                }
                if s.extra_ref(id)?.is_started() {
                    s.start_effect(id)
                } else {
                    s.effect_mut(id)?.autostart = true;
                    Ok(())
                }
            },
        ),
        &[],
    )?;

    let frame = scene.node(owner)?.events.frame.clone();
    let listener = frame.listen(move |s, _| {
        s.advance_effect(id)?;
        Ok(Reply::Unset)
    });
    scene.effect_mut(id)?.frame_listener = Some(listener);

    let extra = scene.extra_ref(id)?;
    extra.on_start.listen(move |s, _| {
        if s.effect(id)?.autostart {
            s.start_effect(id)?;
        }
        Ok(Reply::Unset)
    });
    extra.on_delete.listen(move |s, _| {
        if let Some(l) = s.effect_mut(id)?.frame_listener.take() {
            frame.unlisten(l);
        }
        Ok(Reply::Unset)
    });
    Ok(())
}

impl Scene {
    pub fn effect(&self, id: ExtraId) -> Result<&EffectState> {
        self.extra_state::<EffectState>(id)
    }

    pub fn effect_mut(&mut self, id: ExtraId) -> Result<&mut EffectState> {
        self.extra_state_mut::<EffectState>(id)
    }

    /// Starts an idle or ended effect. Running effects are left alone.
    pub fn start_effect(&mut self, id: ExtraId) -> Result<()> {
        let e = self.effect_mut(id)?;
        if matches!(e.phase, EffectPhase::Delayed { .. } | EffectPhase::Running { .. }) {
            return Ok(());
        }
        if e.delay > 0 {
            e.phase = EffectPhase::Delayed { remaining: e.delay };
            Ok(())
        } else {
            self.begin_effect(id)
        }
    }

    /// Runs `f` when the effect ends.
    pub fn then_call(
        &mut self,
        id: ExtraId,
        f: impl Fn(&mut Scene, ExtraId) -> Result<()> + 'static,
    ) -> Result<()> {
        self.effect_mut(id)?.continuations.push(Rc::new(f));
        Ok(())
    }

    pub(crate) fn advance_effect(&mut self, id: ExtraId) -> Result<()> {
        let Some(extra) = self.extras.get(id) else {
            return Ok(());
        };
        if extra.detaching || !self.is_live(extra.owner) {
            return Ok(());
        }
        let e = self.effect_mut(id)?;
        match e.phase {
            EffectPhase::Idle | EffectPhase::Ended => Ok(()),
            EffectPhase::Delayed { remaining } if remaining > 1 => {
                e.phase = EffectPhase::Delayed {
                    remaining: remaining - 1,
                };
                Ok(())
            }
            EffectPhase::Delayed { .. } => self.begin_effect(id),
            EffectPhase::Running { elapsed } => {
                let tick = EffectTick {
                    elapsed: elapsed + 1,
                    duration: e.duration,
                };
                e.phase = EffectPhase::Running {
                    elapsed: tick.elapsed,
                };
                let on_tick = e.on_tick.clone();
                on_tick.fire(self, tick)?;
                if tick.elapsed >= tick.duration && self.extras.contains_key(id) {
                    self.end_effect(id)?;
                }
                Ok(())
            }
        }
    }

    fn begin_effect(&mut self, id: ExtraId) -> Result<()> {
        let e = self.effect_mut(id)?;
        e.phase = EffectPhase::Running { elapsed: 0 };
        let tick = EffectTick {
            elapsed: 0,
            duration: e.duration,
        };
        let on_begin = e.on_begin.clone();
        on_begin.fire(self, tick)?;
        let still_running = self
            .effect(id)
            .is_ok_and(|e| e.phase == EffectPhase::Running { elapsed: 0 });
        if tick.duration == 0 && still_running {
            self.end_effect(id)?;
        }
        Ok(())
    }

    fn end_effect(&mut self, id: ExtraId) -> Result<()> {
        let (owner, name) = {
            let extra = self.extra_ref(id)?;
            (extra.owner, extra.name.clone())
        };
        let e = self.effect_mut(id)?;
        if e.phase == EffectPhase::Ended {
            return Ok(());
        }
        e.phase = EffectPhase::Ended;
        let tick = EffectTick {
            elapsed: e.duration,
            duration: e.duration,
        };
        let (on_end, then, continuations, no_delete) = (
            e.on_end.clone(),
            e.then.clone(),
            e.continuations.clone(),
            e.no_delete,
        );
        on_end.fire(self, tick)?;

        if self.is_live(owner) {
            for next in &then {
                match self.extra(owner, next) {
                    Some(n) if self.effect(n).is_ok() => self.start_effect(n)?,
                    _ => log::warn!("effect `{name}` cannot chain into missing effect `{next}`"),
                }
            }
            for f in continuations {
                if !self.is_live(owner) {
                    break;
                }
                f(self, id)?;
            }
        } else {
            log::debug!("effect `{name}` ended after its owner was deleted");
        }

        if !no_delete && self.extras.contains_key(id) {
            self.detach_extra(id)?;
        }
        Ok(())
    }
}

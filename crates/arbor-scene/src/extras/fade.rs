use arbor_core::{Easing, FrameTween, Reply, Result};
use serde_json::json;

use crate::extras::effect::install_effect;
use crate::extras::{ExtraId, extra_field};
use crate::scene::Scene;

/// Animates the owner's `alpha` from `from` (default: its current alpha) to `to`.
#[derive(Clone, Copy, Debug)]
pub struct FadeState {
    pub from: Option<f32>,
    pub to: f32,
    pub easing: Easing,
    tween: FrameTween,
}

pub fn install_fade(scene: &mut Scene, id: ExtraId) -> Result<()> {
    install_effect(scene, id)?;
    scene.extra_mut(id)?.insert_state(FadeState {
        from: None,
        to: 1.0,
        easing: Easing::Linear,
        tween: FrameTween::default(),
    });
    scene.map_extra_property(
        id,
        "from",
        extra_field::<FadeState, _>(id, |f| &f.from, |f| &mut f.from),
        &[],
    )?;
    scene.map_extra_property(
        id,
        "to",
        extra_field::<FadeState, _>(id, |f| &f.to, |f| &mut f.to),
        &[],
    )?;
    scene.map_extra_property(
        id,
        "easing",
        extra_field::<FadeState, _>(id, |f| &f.easing, |f| &mut f.easing),
        &[],
    )?;

    let effect = scene.effect(id)?;
    effect.on_begin.listen(move |s, t| {
        let owner = s.extra_ref(id)?.owner;
        let current = s.node(owner)?.alpha;
        let fade = s.extra_state_mut::<FadeState>(id)?;
        let from = fade.from.unwrap_or(current);
        fade.tween = FrameTween::new(from, fade.to, t.duration, fade.easing);
        let alpha = fade.tween.value();
        s.set(owner, "alpha", json!(alpha))?;
        Ok(Reply::Unset)
    });
    effect.on_tick.listen(move |s, _| {
        let owner = s.extra_ref(id)?.owner;
        let alpha = s.extra_state_mut::<FadeState>(id)?.tween.step();
        s.set(owner, "alpha", json!(alpha))?;
        Ok(Reply::Unset)
    });
    Ok(())
}

use arbor_core::{Dir, Easing, FrameTween, Reply, Result, Vec2};
use serde_json::json;

use crate::extras::effect::install_effect;
use crate::extras::{ExtraId, extra_field};
use crate::scene::Scene;

/// Moves the owner `by` units towards `dir` over the effect's duration.
#[derive(Clone, Copy, Debug)]
pub struct SlideState {
    pub by: f32,
    pub dir: Dir,
    pub easing: Easing,
    origin: Vec2,
    tween: FrameTween,
}

pub fn install_slide(scene: &mut Scene, id: ExtraId) -> Result<()> {
    install_effect(scene, id)?;
    scene.extra_mut(id)?.insert_state(SlideState {
        by: 0.0,
        dir: Dir::Right,
        easing: Easing::Linear,
        origin: Vec2::default(),
        tween: FrameTween::default(),
    });
    scene.map_extra_property(
        id,
        "by",
        extra_field::<SlideState, _>(id, |f| &f.by, |f| &mut f.by),
        &[],
    )?;
    scene.map_extra_property(
        id,
        "dir",
        extra_field::<SlideState, _>(id, |f| &f.dir, |f| &mut f.dir),
        &[],
    )?;
    scene.map_extra_property(
        id,
        "easing",
        extra_field::<SlideState, _>(id, |f| &f.easing, |f| &mut f.easing),
        &[],
    )?;

    let effect = scene.effect(id)?;
    effect.on_begin.listen(move |s, t| {
        let owner = s.extra_ref(id)?.owner;
        let origin = s.node(owner)?.rect.origin();
        let slide = s.extra_state_mut::<SlideState>(id)?;
        slide.origin = origin;
        slide.tween = FrameTween::new(0.0, slide.by, t.duration, slide.easing);
        Ok(Reply::Unset)
    });
    effect.on_tick.listen(move |s, _| {
        let owner = s.extra_ref(id)?.owner;
        let slide = s.extra_state_mut::<SlideState>(id)?;
        let offset = slide.tween.step();
        let step = slide.dir.step();
        let (x, y) = (slide.origin.x + step.x * offset, slide.origin.y + step.y * offset);
        s.configure(owner, &json!({ "x": x, "y": y }))?;
        Ok(Reply::Unset)
    });
    Ok(())
}

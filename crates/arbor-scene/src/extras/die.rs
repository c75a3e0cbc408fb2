use arbor_core::{Reply, Result};

use crate::extras::ExtraId;
use crate::extras::effect::install_effect;
use crate::scene::Scene;

/// Deletes the owner when the effect begins.
pub fn install_die(scene: &mut Scene, id: ExtraId) -> Result<()> {
    install_effect(scene, id)?;
    scene.effect(id)?.on_begin.listen(move |s, _| {
        let owner = s.extra_ref(id)?.owner;
        if s.is_live(owner) {
            log::debug!("{} dies", s.full_path(owner)?);
            s.delete(owner)?;
        }
        Ok(Reply::Unset)
    });
    Ok(())
}

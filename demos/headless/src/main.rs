use std::cell::Cell;
use std::rc::Rc;

use arbor_core::{Dir, Reply};
use arbor_scene::{DrawCall, Scene, initialize};
use serde_json::json;

const FRAMES: u64 = 40;

fn build(scene: &mut Scene) -> anyhow::Result<()> {
    scene.create_pane(
        "title",
        &json!({
            "children": {
                "logo": {
                    "type": "Component", "x": 40, "y": 24, "width": 320, "height": 80,
                    "extras": {
                        "appear": { "type": "Fade", "from": 0, "to": 1, "duration": 8, "on": true }
                    }
                },
                "menu": {
                    "type": "Group", "x": 40, "y": 140, "width": 200, "height": 96,
                    "children": {
                        "start":   { "type": "Component", "y": 0,  "width": 200, "height": 24, "downFlow": "options" },
                        "options": { "type": "Component", "y": 32, "width": 200, "height": 24, "upFlow": "start", "downFlow": "quit" },
                        "quit":    { "type": "Component", "y": 64, "width": 200, "height": 24, "upFlow": "options" }
                    },
                    "focus": "start"
                },
                "toast": {
                    "type": "Component", "x": 400, "y": 400, "width": 120, "height": 20,
                    "paint": { "text": "press start" },
                    "extras": {
                        "drift": { "type": "Slide", "by": 30, "dir": "up", "duration": 10, "on": true, "then": "expire" },
                        "expire": { "type": "Die", "delay": 4 }
                    }
                }
            },
            "focus": "menu",
            "active": true
        }),
    )?;

    for name in ["start", "options", "quit"] {
        let item = scene.resolve(&format!("title:/menu/{name}"))?;
        scene.node(item)?.events().focus_change.listen(move |s, on| {
            s.set(item, "paint", json!({ "selected": on }))?;
            Ok(Reply::Unset)
        });
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    initialize()?;

    let mut scene = Scene::default();
    build(&mut scene)?;

    let quit = Rc::new(Cell::new(false));
    let q = quit.clone();
    let item = scene.resolve("title:/menu/quit")?;
    scene.node(item)?.events().action.listen(move |_, event| {
        log::info!("quit chosen: {event}");
        q.set(true);
        Ok(false.into())
    });

    let mut surface = |call: &DrawCall| -> anyhow::Result<()> {
        println!("{}", serde_json::to_string(call)?);
        Ok(())
    };

    for frame in 1..=FRAMES {
        match frame {
            6 | 14 => {
                scene.press_dir(Dir::Down)?;
            }
            22 => {
                scene.press_action(json!({ "key": "enter" }))?;
            }
            _ => {}
        }

        let report = scene.tick(1.0 / 60.0, &mut surface)?;
        for failure in &report.failures {
            log::warn!(
                "frame {}: {} failed: {}",
                report.frame,
                failure.pane.as_deref().unwrap_or("scene"),
                failure.error
            );
        }
        if report.rendered {
            log::debug!("frame {} rendered", report.frame);
        }
        if quit.get() {
            break;
        }
    }

    log::info!(
        "stopped after {} frames, {} render passes",
        scene.frame(),
        scene.renders()
    );
    Ok(())
}

//! # Arbor scene
//!
//! A retained scene tree for 2D games. A [`Scene`] owns every component in an
//! arena; groups own their children by name, panes are the registered roots,
//! and exactly one pane is active at a time.
//!
//! Trees are built from JSON configuration. Each component type installs its
//! properties on a per-node [`PropertyMapper`](arbor_core::PropertyMapper),
//! and a configuration object is applied as one batch:
//!
//! ```rust
//! use arbor_scene::{RecordingSurface, Scene, initialize};
//! use serde_json::json;
//!
//! initialize().unwrap();
//! let mut scene = Scene::default();
//! scene
//!     .create_pane("menu", &json!({
//!         "children": {
//!             "title": { "type": "Component", "x": 10, "y": 4, "width": 100, "height": 20 }
//!         },
//!         "active": true
//!     }))
//!     .unwrap();
//!
//! let mut surface = RecordingSurface::new();
//! let report = scene.tick(1.0 / 60.0, &mut surface).unwrap();
//! assert!(report.rendered);
//! assert_eq!(surface.calls[1].path, "menu:/title");
//! ```
//!
//! Ticks run `frame` listeners parent before child, reap deleted nodes, and
//! render at most once no matter how many redraws were booked.

pub mod config;
pub mod extras;
pub mod group;
pub mod node;
pub mod pane;
pub mod path;
pub mod registry;
pub mod scene;
pub mod surface;
pub mod tests;
pub mod ticker;

pub use extras::effect::{Continuation, EffectPhase, EffectState, EffectTick};
pub use extras::fade::FadeState;
pub use extras::slide::SlideState;
pub use extras::{Extra, ExtraId, extra_field};
pub use group::{FocusBehaviour, GroupState, PopulateDiff};
pub use node::{
    Component, FILL_PARENT, FIT_CONTENTS, Lifecycle, NodeFlags, NodeId, Tick, node_field,
};
pub use registry::{ComponentCtor, ExtraCtor, initialize, register_extra, register_type};
pub use scene::{Scene, SceneSettings, TickFailure, TickReport};
pub use surface::{DrawCall, RecordingSurface, Surface};
pub use ticker::FrameTicker;

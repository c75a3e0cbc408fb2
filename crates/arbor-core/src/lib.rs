//! # Arbor core
//!
//! The leaf mechanisms the scene tree is built from. Nothing here knows about
//! components or panes:
//!
//! - [`EventDispatcher`]: a named channel whose listener replies are combined
//!   according to a [`Mode`].
//! - [`PropertyMapper`]: name to accessor registry with dependency-ordered,
//!   batched recomputation.
//! - [`Error`]: the error type shared by every arbor crate.
//!
//! ```rust
//! use arbor_core::*;
//!
//! let may_close: EventDispatcher<()> = EventDispatcher::new("may_close", Mode::And);
//! may_close.listen(|_, _| Ok(true.into()));
//! may_close.listen(|_, _| Ok(false.into()));
//! assert!(!may_close.fire(&mut (), ()).unwrap().is_truthy());
//! ```

pub mod animation;
pub mod dispatcher;
pub mod error;
pub mod geometry;
pub mod mapper;

pub use animation::*;
pub use dispatcher::*;
pub use error::*;
pub use geometry::*;
pub use mapper::*;

#![doc(html_root_url = "https://docs.rs/rendered-dom/0.1.0")]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Keeps a rendered element tree in sync with server-computed template state.
//!
//! A [`TemplateStore`] folds compact diffs into the statics and dynamics of a view,
//! a [`FragmentRenderer`](`render::FragmentRenderer`) expands them into markup while marking unchanged roots as skippable,
//! and the [`PatchCoordinator`](`patch::PatchCoordinator`) reconciles that markup into a [`Document`] with keyed,
//! focus-preserving patches. [`View`] sequences the three per received payload.

#[cfg(doctest)]
pub mod readme {
	doc_comment::doctest!("../README.md");
}

pub mod config;
pub mod count_map;
pub mod debug;
pub mod dom;
#[cfg(target_arch = "wasm32")]
pub mod load;
pub mod markup;
pub mod patch;
pub mod queue;
pub mod reconcile;
pub mod render;
pub mod resolve;
pub mod store;
pub mod template;
pub mod view;

pub use config::{Bindings, PatchConfig, UpdatePolicy};
pub use dom::{Document, NodeId};
pub use patch::{LifecycleHooks, PatchError, PatchOutcome};
pub use store::{DiffError, TemplateStore};
pub use view::View;

//! Device, memory, pipeline, and render-graph core for a Vulkan renderer.
//!
//! This crate owns the layer directly above `ash`: a sub-allocating
//! memory pool, tracked buffers/images, SPIR-V reflection, descriptor and
//! pipeline-layout derivation with a content-hash-keyed pipeline cache,
//! a render-pass graph with automatic dependency inference, and command
//! buffers that track every resource they touch and emit their own
//! image-layout transitions.
//!
//! Windowing, asset import, and scene-level concerns are out of scope:
//! this crate expects a swapchain image, a loaded SPIR-V + manifest pair,
//! and raw bytes to upload, and hands back drawable, trackable
//! primitives.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod render_pass;
pub mod resource;
pub mod shader;

pub mod prelude;

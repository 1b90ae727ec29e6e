//! Device-owned GPU resources: buffers, images, samplers, and their pools.

pub mod buffer;
pub mod image;
pub mod pool;
pub mod sampler;
pub mod tracking;

pub use buffer::{Buffer, BufferView, TexelViewKey};
pub use image::{guess_stage_access, ComponentMapping, Image, ImageView, Subresource, TrackedState, ViewKey};
pub use pool::ResourcePool;
pub use sampler::Sampler;
pub use tracking::{InFlightMarker, ResourceTracking};

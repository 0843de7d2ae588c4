//! Command recording, barriers, shaders and pipelines

pub mod barrier;
pub mod commands;
pub mod pipeline;
pub mod shader;

pub use commands::CommandManager;
pub use pipeline::{BlendMode, ComputePipelineBuilder, GraphicsPipelineBuilder};

pub mod pipeline;

pub use pipeline::PipelineDescriptor;

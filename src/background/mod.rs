pub mod processors;
pub mod queue;

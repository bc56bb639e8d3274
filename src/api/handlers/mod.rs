pub mod pipe;
pub mod system;

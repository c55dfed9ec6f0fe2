pub mod remote;
pub mod render;

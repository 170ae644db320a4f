pub mod client;
pub mod tensor;
pub mod wire;

pub use client::*;
pub use tensor::*;
pub use wire::*;

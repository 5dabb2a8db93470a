pub mod builder;
pub mod lifecycle;

pub use lifecycle::*;

pub mod passthrough;
pub mod sanitizer;

pub use sanitizer::Sanitizer;

pub mod arena;
pub mod quarantine;

pub use arena::Arena;
pub use quarantine::Quarantine;

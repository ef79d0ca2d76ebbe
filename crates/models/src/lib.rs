use uuid::Uuid;

pub mod billing;
pub mod errors;
pub mod job;
pub mod model;

pub use billing::*;
pub use errors::*;
pub use job::*;
pub use model::*;

/// Common identifier type
pub type Id = Uuid;

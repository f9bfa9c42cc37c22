// Domain Layer - Actions and catalogs

pub mod action;
pub mod catalog;
pub mod error;

pub use action::{Action, ActionIndex, Direction, UNIDENTIFIED};
pub use catalog::ActionCatalog;
pub use error::DomainError;

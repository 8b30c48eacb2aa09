//! Database models split into domain-specific modules.

pub mod appointment;
pub mod customer;
pub mod invoice;
pub mod medical_record;
pub mod pet;
pub mod user;

pub use appointment::*;
pub use customer::*;
pub use invoice::*;
pub use medical_record::*;
pub use pet::*;
pub use user::*;

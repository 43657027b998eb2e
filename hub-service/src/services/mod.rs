//! Typed facades over the coordinator
//!
//! One service per entity kind. Each takes plain identifiers and attribute
//! maps and returns typed entities or a [`hub_core::HubError`].

mod contact;
mod user;

pub use contact::ContactService;
pub use user::UserService;

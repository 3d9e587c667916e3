//! Users, login sessions, and recipient filters.

pub mod filter;
pub mod model;
pub mod password;

pub use filter::{RecipientFilter, UserQuery};
pub use model::{NewUser, User};

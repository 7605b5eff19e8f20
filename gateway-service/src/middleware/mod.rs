pub mod auth;

pub use auth::{Authed, AuthedAccount, auth_middleware};

//! Bearer-token authentication at the request boundary.
//!
//! Handlers that take [`Auth`] only run for requests carrying a valid access
//! token in the `Authorization` header, and receive the token's [`Identity`]
//! as a typed value. Verification is stateless: it never touches the database.
//!
//! [`Identity`]: crate::token::Identity

mod errors;
mod extractors;
mod header;
mod ip;
mod state;

pub use errors::AuthError;
pub use extractors::{Auth, Client, authenticate};
pub use header::bearer_token;
pub use ip::{HasHeadersAndExtensions, client_ip};
pub use state::HasAuthBackend;

//! Authentication state trait and macro.

use crate::token::TokenCodec;

/// Trait for router state that can verify bearer tokens.
pub trait HasAuthBackend {
    fn tokens(&self) -> &TokenCodec;
    /// Whether `X-Forwarded-For` is trusted for the client address.
    fn trust_proxy(&self) -> bool;
    /// Tokens issued for longer than this are refresh tokens and are refused.
    fn access_ttl(&self) -> chrono::Duration;
}

/// Implement `HasAuthBackend` for a state struct with the standard fields.
///
/// The struct must have these fields:
/// - `tokens: Arc<TokenCodec>`
/// - `trust_proxy: bool`
/// - `access_ttl: chrono::Duration`
///
/// # Example
/// ```ignore
/// #[derive(Clone)]
/// pub struct MyState {
///     pub tokens: Arc<TokenCodec>,
///     pub trust_proxy: bool,
///     pub access_ttl: chrono::Duration,
///     // ... other fields
/// }
///
/// impl_has_auth_backend!(MyState);
/// ```
#[macro_export]
macro_rules! impl_has_auth_backend {
    ($state_type:ty) => {
        impl $crate::auth::HasAuthBackend for $state_type {
            fn tokens(&self) -> &$crate::token::TokenCodec {
                &self.tokens
            }
            fn trust_proxy(&self) -> bool {
                self.trust_proxy
            }
            fn access_ttl(&self) -> ::chrono::Duration {
                self.access_ttl
            }
        }
    };
}

//! Gating and payment-callback core for the bazaar storefront wallet.
//!
//! Implements the pieces of the wallet backend that must hold up under
//! adversarial input:
//!
//! - **Auth** ([`auth`]) — bearer tokens cross-checked against a revocable
//!   server-side session registry ([`registry`]); signature validity alone
//!   never admits a request.
//! - **Throttling** ([`rate_limit`]) — fixed-window counters with a
//!   failures-only policy for login, so credential guessing is bounded while
//!   legitimate repeated logins are not.
//! - **Gateway adapter** ([`zarinpal`], [`zarinpal_client`]) — transaction-id
//!   generation, strict callback validation with accumulated errors, masked
//!   audit logging, and the REST calls for payment request/verification.
//! - **Scrubbing** ([`sanitize`]) — markup and script stripping over inbound
//!   JSON containers.
//!
//! The HTTP pipeline wiring these together lives in `bazaar-wallet-server`.

pub mod auth;
pub mod config;
pub mod error;
pub mod password;
pub mod rate_limit;
pub mod registry;
pub mod sanitize;
pub mod signature;
pub mod zarinpal;
pub mod zarinpal_client;

pub use auth::{authenticate, authorize, AuthContext, AuthFailure, Claims, Role};
pub use config::{AppConfig, JwtSettings, RateLimitSettings, RunEnv, ZarinpalSettings};
pub use error::{AuthError, ConfigError, StoreError};
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use registry::{MemoryUserStore, Session, SqliteUserStore, User, UserStore};
pub use zarinpal::{CallbackReport, CallbackStatus, ZarinpalGateway};
pub use zarinpal_client::{GatewayError, PaymentIntent, SettledPayment, ZarinpalClient};

use std::sync::Arc;

use bazaar_wallet::{AppConfig, RateLimiter, UserStore, ZarinpalClient, ZarinpalGateway};

/// Shared application state. Built once in `main` from the validated
/// configuration; no component reads ambient globals.
pub struct AppState {
    pub config: AppConfig,
    pub users: Arc<dyn UserStore>,
    pub gateway: ZarinpalGateway,
    pub payments: ZarinpalClient,
    /// General API policy: every request counts, keyed by client IP.
    pub api_limiter: RateLimiter,
    /// Login policy: failed attempts only, keyed by IP + route path.
    pub login_limiter: RateLimiter,
}

impl AppState {
    pub fn new(config: AppConfig, users: Arc<dyn UserStore>) -> Self {
        let gateway = ZarinpalGateway::new(config.zarinpal.clone());
        let payments = ZarinpalClient::new(&config.zarinpal);
        let api_limiter = RateLimiter::general(&config.rate_limit);
        let login_limiter = RateLimiter::login(&config.rate_limit);
        AppState {
            config,
            users,
            gateway,
            payments,
            api_limiter,
            login_limiter,
        }
    }
}

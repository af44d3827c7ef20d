//! Application state

use std::sync::Arc;

use donorsync_membership::{MembershipResult, MemberStore, PaypalVerifier, Reconciler};

use crate::config::Config;

/// Shared application state, cloned into every handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MemberStore>,
    pub reconciler: Reconciler,
    pub config: Arc<Config>,
    /// Present only when a PayPal webhook id is configured
    pub paypal_verifier: Option<PaypalVerifier>,
}

impl AppState {
    pub fn new(store: Arc<dyn MemberStore>, config: Config) -> MembershipResult<Self> {
        let paypal_verifier = match config.paypal.verifier_config() {
            Some(paypal) => {
                tracing::info!("PayPal webhook signature verification enabled");
                Some(PaypalVerifier::new(paypal)?)
            }
            None => {
                tracing::warn!("PAYPAL_WEBHOOK_ID not set, PayPal signatures will not be verified");
                None
            }
        };

        Ok(Self {
            reconciler: Reconciler::new(store.clone()),
            store,
            config: Arc::new(config),
            paypal_verifier,
        })
    }
}

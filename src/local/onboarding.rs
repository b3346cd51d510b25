// Has this device been through onboarding? Stored as the string "true".

use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use super::LocalStore;

pub const ONBOARDING_KEY: &str = "hasCompletedOnboarding";

pub struct OnboardingState {
    store: Arc<dyn LocalStore>,
}

impl OnboardingState {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    /// Read errors count as "not completed".
    pub async fn has_completed(&self) -> bool {
        match self.store.get_item(ONBOARDING_KEY).await {
            Ok(value) => value.as_deref() == Some("true"),
            Err(e) => {
                warn!(error = %e, "Failed to load onboarding status");
                false
            }
        }
    }

    pub async fn complete(&self) -> Result<()> {
        self.store.set_item(ONBOARDING_KEY, "true").await
    }

    pub async fn reset(&self) -> Result<()> {
        self.store.remove_item(ONBOARDING_KEY).await
    }
}

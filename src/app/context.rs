use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use crate::{
    app::retry::RetryPolicy,
    domain::{identity::AllowedProjects, involvement::Viewer},
};

/// Everything one fetch cycle needs, passed explicitly instead of read
/// from process-wide state.
#[derive(Clone)]
pub struct FetchContext {
    pub viewer: Viewer,
    pub allowed: AllowedProjects,
    pub cutoff: DateTime<Utc>,
    pub retry: RetryPolicy,
}

impl FetchContext {
    pub fn new(
        viewer: Viewer,
        allowed: AllowedProjects,
        cutoff: DateTime<Utc>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        if viewer.username.trim().is_empty() {
            return Err(anyhow!("current user is empty; set username or check the token"));
        }
        Ok(Self {
            viewer,
            allowed,
            cutoff,
            retry,
        })
    }
}

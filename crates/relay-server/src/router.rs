//! Admin request routing.
//!
//! Each admin frame is validated here and handed to the registry as one
//! [`AdminMessage`]. The acknowledgement reports acceptance only; delivery
//! happens afterwards on the registry loop.

use relay_core::{AdminAck, AdminMessage, RelayError, Result, Target};
use tracing::{debug, instrument, warn};

use crate::metrics::ADMIN_REJECTED_TOTAL;
use crate::registry::RegistryHandle;

/// Validates admin frames and submits them to the registry.
#[derive(Clone, Debug)]
pub struct AdminRouter {
    registry: RegistryHandle,
}

impl AdminRouter {
    /// Create a router over `registry`.
    pub fn new(registry: RegistryHandle) -> Self {
        Self { registry }
    }

    /// Route one raw admin frame and build its acknowledgement.
    #[instrument(skip_all)]
    pub async fn route(&self, raw: &str) -> AdminAck {
        match self.accept(raw).await {
            Ok(target) => {
                debug!(%target, "admin message accepted");
                AdminAck::accepted(&target)
            }
            Err(err) => {
                match &err {
                    RelayError::Validation(reason) => debug!(reason = %reason, "admin request rejected"),
                    other => warn!(error = %other, "admin request rejected"),
                }
                metrics::counter!(ADMIN_REJECTED_TOTAL, "code" => err.code()).increment(1);
                AdminAck::rejected(&err)
            }
        }
    }

    /// Validate `raw` and submit it. Returns the normalized target.
    pub async fn accept(&self, raw: &str) -> Result<Target> {
        let message = AdminMessage::parse(raw)?;
        let target = message.target.clone();
        self.registry.submit(message).await?;
        Ok(target)
    }
}

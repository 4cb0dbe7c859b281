use async_trait::async_trait;
use tracing::info;

use super::{Driver, DriverError};
use crate::alarm::AlarmContext;

/// Writes alarms to the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDriver;

#[async_trait]
impl Driver for LogDriver {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(
        &self,
        title: &str,
        content: &str,
        context: &AlarmContext,
    ) -> Result<(), DriverError> {
        info!(?context, "ALARM: *** {title} ***\n{content}");
        Ok(())
    }
}

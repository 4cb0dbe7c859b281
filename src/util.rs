use std::future::Future;
use std::time::Duration;

use tracing::warn;

const CONFIG_FILE: &str = "STACKWATCH_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "/etc/stackwatch/stackwatch.json";

pub fn get_config_file() -> String {
    std::env::var(CONFIG_FILE).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string())
}

const RABBIT_PASSWORD: &str = "STACKWATCH_RABBIT_PASSWORD";

pub fn get_rabbit_password() -> Option<String> {
    std::env::var(RABBIT_PASSWORD).ok()
}

const SMTP_PASSWORD: &str = "STACKWATCH_SMTP_PASSWORD";

pub fn get_smtp_password() -> Option<String> {
    std::env::var(SMTP_PASSWORD).ok()
}

/// Run `operation` up to `attempts` times, sleeping `attempt * delay` after
/// each failed attempt. The error of the last attempt is returned.
pub async fn retry_linear<T, E, F, Fut>(
    attempts: usize,
    delay: Duration,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                let pause = delay * attempt as u32;
                warn!("attempt {attempt}/{attempts} failed: {e}, retrying in {pause:?}");
                tokio::time::sleep(pause).await;
                attempt += 1;
            }
        }
    }
}

use crate::error::GuardResult;
use async_trait::async_trait;
use tracing::info;

/// Delivers a one-time code to a phone. Transport lives outside this crate.
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, phone: &str, code: &str, locale: &str) -> GuardResult<()>;
}

/// Records deliveries in the log instead of sending anything.
#[derive(Debug, Default, Clone)]
pub struct LogSmsSender;

#[async_trait]
impl SmsSender for LogSmsSender {
    async fn send(&self, phone: &str, code: &str, locale: &str) -> GuardResult<()> {
        info!(
            target: "slotguard::sms",
            phone = %phone,
            locale = %locale,
            code_length = code.len(),
            "SMS delivery skipped (log sender)"
        );
        Ok(())
    }
}

use tracing::info;

/// Outbound mail. Delivery itself lives outside this service; the default
/// implementation only logs.
pub trait Mailer: Send + Sync {
    fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        info!("Mail to {} [{}]: {}", to, subject, body);
        Ok(())
    }
}

pub fn otp_subject() -> &'static str {
    "Verify your email"
}

pub fn otp_body(code: &str) -> String {
    format!(
        "Your verification code is {}. It expires in {} minutes.",
        code,
        crate::otp::OTP_TTL_MINUTES
    )
}

pub mod auth;
pub mod error;
pub mod mailer;
pub mod middleware;
pub mod otp;
pub mod password;
pub mod token;

//! Outbound OTP notification collaborator.
//!
//! The ledger and auth flows only ever hand a `{to, otp, purpose, name}`
//! bundle to this boundary and consume no return value.  Template rendering
//! and SMTP transport live behind the trait; the shipped implementation logs
//! the delivery, which is what local development wants.

use std::fmt;

/// Why an OTP is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpPurpose {
    Signup,
    Login,
    PasswordReset,
}

impl fmt::Display for OtpPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OtpPurpose::Signup => "signup",
            OtpPurpose::Login => "login",
            OtpPurpose::PasswordReset => "password-reset",
        };
        f.write_str(s)
    }
}

/// One OTP delivery request.
#[derive(Debug, Clone, Copy)]
pub struct OtpEmail<'a> {
    pub to: &'a str,
    pub otp: &'a str,
    pub purpose: OtpPurpose,
    pub name: &'a str,
}

/// Mail collaborator interface.  Implementations must not block the caller
/// on delivery; failures are their own concern to report.
pub trait OtpMailer: Send + Sync {
    fn send_otp(&self, email: OtpEmail<'_>);
}

/// Development mailer: writes the OTP to the log instead of delivering it.
pub struct LogMailer;

impl OtpMailer for LogMailer {
    fn send_otp(&self, email: OtpEmail<'_>) {
        tracing::info!(
            to = %email.to,
            name = %email.name,
            purpose = %email.purpose,
            otp = %email.otp,
            "OTP email (log delivery)"
        );
    }
}

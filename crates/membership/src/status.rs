//! Canonical member status
//!
//! The store only ever holds one of these five values. Vendor status text
//! is mapped onto them through [`MemberStatus::from_vendor_text`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
    Cancelled,
    Suspended,
    Pending,
    PaymentFailed,
}

impl MemberStatus {
    pub const ALL: [MemberStatus; 5] = [
        MemberStatus::Active,
        MemberStatus::Cancelled,
        MemberStatus::Suspended,
        MemberStatus::Pending,
        MemberStatus::PaymentFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Active => "active",
            MemberStatus::Cancelled => "cancelled",
            MemberStatus::Suspended => "suspended",
            MemberStatus::Pending => "pending",
            MemberStatus::PaymentFailed => "payment_failed",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, MemberStatus::Active)
    }

    /// Map free-text vendor status onto a canonical status.
    ///
    /// Case-insensitive substring ladder, first match wins:
    /// succeed/success/active, then fail/cancel/refund, then suspend/pend.
    /// Anything else falls through to `Active` with a warning.
    pub fn from_vendor_text(text: &str) -> MemberStatus {
        let lower = text.to_lowercase();
        let contains_any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if contains_any(&["succeed", "success", "active"]) {
            MemberStatus::Active
        } else if contains_any(&["fail", "cancel", "refund"]) {
            MemberStatus::Cancelled
        } else if contains_any(&["suspend", "pend"]) {
            MemberStatus::Suspended
        } else {
            tracing::warn!(status = %text, "Unexpected vendor status, defaulting to active");
            MemberStatus::Active
        }
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strict parse of a stored or requested status value.
impl FromStr for MemberStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        MemberStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| ValidationError::new(format!("unknown member status '{}'", s.trim())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_words_map_to_active() {
        for text in ["Payment Succeeded", "SUCCESS", "Active", "reactivated"] {
            assert_eq!(MemberStatus::from_vendor_text(text), MemberStatus::Active, "{text}");
        }
    }

    #[test]
    fn test_cancel_words_map_to_cancelled() {
        for text in ["Failed", "Refund - Cancelled", "canceled", "REFUNDED"] {
            assert_eq!(
                MemberStatus::from_vendor_text(text),
                MemberStatus::Cancelled,
                "{text}"
            );
        }
    }

    #[test]
    fn test_pend_and_suspend_map_to_suspended() {
        assert_eq!(
            MemberStatus::from_vendor_text("Pending Review"),
            MemberStatus::Suspended
        );
        assert_eq!(
            MemberStatus::from_vendor_text("Suspended"),
            MemberStatus::Suspended
        );
    }

    #[test]
    fn test_ladder_order_decides_mixed_text() {
        // "cancel" is checked before "suspend"
        assert_eq!(
            MemberStatus::from_vendor_text("suspended then cancelled"),
            MemberStatus::Cancelled
        );
        // "active" is checked before everything
        assert_eq!(
            MemberStatus::from_vendor_text("inactive"),
            MemberStatus::Active
        );
    }

    #[test]
    fn test_unmatched_text_defaults_to_active() {
        assert_eq!(MemberStatus::from_vendor_text("foobar"), MemberStatus::Active);
        assert_eq!(MemberStatus::from_vendor_text(""), MemberStatus::Active);
    }

    #[test]
    fn test_strict_parse() {
        assert_eq!(
            " Payment_Failed ".parse::<MemberStatus>().unwrap(),
            MemberStatus::PaymentFailed
        );
        assert!("succeeded".parse::<MemberStatus>().is_err());
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&MemberStatus::PaymentFailed).unwrap();
        assert_eq!(json, "\"payment_failed\"");
    }
}

//! Event normalization
//!
//! Every inbound shape (generic webhook, donation webhook, PayPal event, CSV
//! export row) is turned into a [`NormalizedEvent`] here. Vendor fields are
//! loosely typed, so nothing is trusted to match its declared schema: booleans
//! may arrive as strings, amounts as strings or numbers, and any field may be
//! missing.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ValidationError;
use crate::status::MemberStatus;

/// Monthly amount recorded on PayPal activation when the event carries none
pub const DEFAULT_MONTHLY_AMOUNT: &str = "10.00";

/// Keys that can identify a member. Email is the primary natural key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IdentityKeys {
    pub email: Option<String>,
    pub subscription_id: Option<String>,
    pub payer_id: Option<String>,
}

impl IdentityKeys {
    pub fn from_email(email: String) -> Self {
        Self {
            email: Some(email),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.subscription_id.is_none() && self.payer_id.is_none()
    }

    /// Best label for log lines
    pub fn describe(&self) -> &str {
        self.email
            .as_deref()
            .or(self.subscription_id.as_deref())
            .or(self.payer_id.as_deref())
            .unwrap_or("<unidentified>")
    }
}

/// A payment reported alongside an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentDetails {
    /// Vendor transaction id; payments are idempotent on this
    pub transaction_id: String,
    /// Amount exactly as the vendor sent it
    pub amount: String,
    pub currency: Option<String>,
}

/// Canonical form of any inbound event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedEvent {
    pub identity: IdentityKeys,
    /// Empty when absent or when the event is anonymous
    pub name: String,
    pub is_anonymous: bool,
    pub status: MemberStatus,
    pub monthly_amount: Option<String>,
    pub payment: Option<PaymentDetails>,
    pub referred_by: Option<String>,
    /// Leave the stored status alone and never create a member; only the
    /// payment and secondary keys apply
    pub payment_only: bool,
}

impl NormalizedEvent {
    /// Event for a plain email/status pair with no optional data
    pub fn new(email: String, status: MemberStatus) -> Self {
        Self {
            identity: IdentityKeys::from_email(email),
            name: String::new(),
            is_anonymous: false,
            status,
            monthly_amount: None,
            payment: None,
            referred_by: None,
            payment_only: false,
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.identity.email.as_deref()
    }
}

/// Lower-case and trim an email; empty input is a validation failure.
pub fn normalize_email(raw: &str) -> Result<String, ValidationError> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() {
        return Err(ValidationError::email_required());
    }
    Ok(email)
}

/// Free-text boolean surrogate: "true", "yes" and "1" (any case) are true.
pub fn parse_anonymous(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "true" | "yes" | "1")
}

/// Empty or one-time frequencies are not recurring.
pub fn is_recurring(frequency: &str) -> bool {
    let compact: String = frequency
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .collect();
    !matches!(compact.as_str(), "" | "onetime" | "once")
}

/// Anonymous events never carry a display name downstream.
fn display_name(name: Option<&str>, is_anonymous: bool) -> String {
    if is_anonymous {
        return String::new();
    }
    name.map(str::trim).unwrap_or_default().to_string()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Amounts pass through as text; anything that is not a number is dropped.
fn checked_amount(raw: Option<&str>) -> Option<String> {
    let amount = non_empty(raw)?;
    if amount.parse::<f64>().map(f64::is_finite).unwrap_or(false) {
        Some(amount)
    } else {
        tracing::warn!(amount = %amount, "Ignoring non-numeric amount");
        None
    }
}

/// Accept a JSON string, bool or number as text.
fn loose_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(other) => Some(other.to_string()),
    })
}

/// Treat an explicit JSON `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// =============================================================================
// Generic webhook (Zapier style)
// =============================================================================

/// `{email, name, status, anonymous}` as sent by automation platforms
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemberWebhook {
    #[serde(default, deserialize_with = "loose_text")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub anonymous: Option<String>,
}

impl MemberWebhook {
    pub fn normalize(&self) -> Result<NormalizedEvent, ValidationError> {
        let email = normalize_email(self.email.as_deref().unwrap_or_default())?;
        let is_anonymous = self.anonymous.as_deref().is_some_and(parse_anonymous);
        let status = MemberStatus::from_vendor_text(self.status.as_deref().unwrap_or_default());

        Ok(NormalizedEvent {
            name: display_name(self.name.as_deref(), is_anonymous),
            is_anonymous,
            ..NormalizedEvent::new(email, status)
        })
    }
}

// =============================================================================
// Donation webhook (monetary variant)
// =============================================================================

/// Donation platform payload with amount and recurrence data
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DonationWebhook {
    #[serde(default, deserialize_with = "loose_text")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub anonymous: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub amount: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub currency: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub frequency: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub donation_id: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub event_type: Option<String>,
}

impl DonationWebhook {
    pub fn normalize(&self) -> Result<NormalizedEvent, ValidationError> {
        let email = normalize_email(self.email.as_deref().unwrap_or_default())?;
        let is_anonymous = self.anonymous.as_deref().is_some_and(parse_anonymous);

        // The event type stands in for a missing status
        let status_text = non_empty(self.status.as_deref())
            .or_else(|| non_empty(self.event_type.as_deref()))
            .unwrap_or_default();
        let status = MemberStatus::from_vendor_text(&status_text);

        // Failed or refunded donations carry an amount that was never received
        let amount = if status == MemberStatus::Active {
            checked_amount(self.amount.as_deref())
        } else {
            None
        };
        let recurring = self.frequency.as_deref().is_some_and(is_recurring);
        let monthly_amount = if recurring { amount.clone() } else { None };

        let payment = match (non_empty(self.donation_id.as_deref()), amount) {
            (Some(transaction_id), Some(amount)) => Some(PaymentDetails {
                transaction_id,
                amount,
                currency: non_empty(self.currency.as_deref()),
            }),
            (None, Some(amount)) => {
                tracing::warn!(email = %email, amount = %amount, "Donation has no id, payment not recorded");
                None
            }
            _ => None,
        };

        Ok(NormalizedEvent {
            name: display_name(self.name.as_deref(), is_anonymous),
            is_anonymous,
            monthly_amount,
            payment,
            ..NormalizedEvent::new(email, status)
        })
    }
}

// =============================================================================
// PayPal webhook
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaypalEvent {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub event_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub resource: PaypalResource,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaypalResource {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub custom_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub subscriber: PaypalSubscriber,
    #[serde(default, deserialize_with = "null_as_default")]
    pub billing_agreement_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub amount: PaypalAmount,
    #[serde(default, deserialize_with = "null_as_default")]
    pub payer: PaypalPayer,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaypalSubscriber {
    #[serde(default, deserialize_with = "null_as_default")]
    pub email_address: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub payer_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: PaypalName,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaypalPayer {
    #[serde(default, deserialize_with = "null_as_default")]
    pub payer_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub email_address: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub payer_info: PaypalPayerInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaypalPayerInfo {
    #[serde(default, deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub payer_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaypalName {
    #[serde(default, deserialize_with = "null_as_default")]
    pub given_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub surname: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaypalAmount {
    #[serde(default, alias = "total", deserialize_with = "loose_text")]
    pub value: Option<String>,
    #[serde(default, alias = "currency", deserialize_with = "null_as_default")]
    pub currency_code: String,
}

/// PayPal event types this service acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaypalEventKind {
    SubscriptionCreated,
    SubscriptionActivated,
    SubscriptionReactivated,
    SubscriptionCancelled,
    SubscriptionExpired,
    SubscriptionSuspended,
    SubscriptionPaymentFailed,
    SaleCompleted,
}

impl PaypalEventKind {
    pub fn parse(event_type: &str) -> Option<Self> {
        match event_type {
            "BILLING.SUBSCRIPTION.CREATED" => Some(Self::SubscriptionCreated),
            "BILLING.SUBSCRIPTION.ACTIVATED" => Some(Self::SubscriptionActivated),
            "BILLING.SUBSCRIPTION.RE-ACTIVATED" => Some(Self::SubscriptionReactivated),
            "BILLING.SUBSCRIPTION.CANCELLED" => Some(Self::SubscriptionCancelled),
            "BILLING.SUBSCRIPTION.EXPIRED" => Some(Self::SubscriptionExpired),
            "BILLING.SUBSCRIPTION.SUSPENDED" => Some(Self::SubscriptionSuspended),
            "BILLING.SUBSCRIPTION.PAYMENT.FAILED" => Some(Self::SubscriptionPaymentFailed),
            "PAYMENT.SALE.COMPLETED" => Some(Self::SaleCompleted),
            _ => None,
        }
    }

    pub fn target_status(&self) -> MemberStatus {
        match self {
            Self::SubscriptionCreated => MemberStatus::Pending,
            // Sales never change status; see `NormalizedEvent::payment_only`
            Self::SubscriptionActivated | Self::SubscriptionReactivated | Self::SaleCompleted => {
                MemberStatus::Active
            }
            Self::SubscriptionCancelled | Self::SubscriptionExpired => MemberStatus::Cancelled,
            Self::SubscriptionSuspended => MemberStatus::Suspended,
            Self::SubscriptionPaymentFailed => MemberStatus::PaymentFailed,
        }
    }
}

impl PaypalEvent {
    /// Normalize a PayPal event. Unhandled event types yield `Ok(None)`.
    pub fn normalize(&self) -> Result<Option<NormalizedEvent>, ValidationError> {
        let Some(kind) = PaypalEventKind::parse(&self.event_type) else {
            tracing::info!(
                event_type = %self.event_type,
                event_id = %self.id,
                "Unhandled PayPal event type"
            );
            return Ok(None);
        };

        let resource = &self.resource;
        let identity = match kind {
            PaypalEventKind::SaleCompleted => {
                let payer = &resource.payer;
                let (payer_id, email) = if !payer.payer_id.is_empty() {
                    (payer.payer_id.as_str(), payer.email_address.as_str())
                } else {
                    (
                        payer.payer_info.payer_id.as_str(),
                        payer.payer_info.email.as_str(),
                    )
                };
                IdentityKeys {
                    email: normalize_email(email).ok(),
                    subscription_id: non_empty(Some(resource.billing_agreement_id.as_str())),
                    payer_id: non_empty(Some(payer_id)),
                }
            }
            _ => IdentityKeys {
                email: normalize_email(&resource.subscriber.email_address).ok(),
                subscription_id: non_empty(Some(resource.id.as_str())),
                payer_id: non_empty(Some(resource.subscriber.payer_id.as_str())),
            },
        };

        if identity.is_empty() {
            return Err(ValidationError::email_required());
        }

        let name = [
            resource.subscriber.name.given_name.trim(),
            resource.subscriber.name.surname.trim(),
        ]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");

        let amount = checked_amount(resource.amount.value.as_deref());
        let monthly_amount = match kind {
            PaypalEventKind::SubscriptionActivated => {
                Some(amount.clone().unwrap_or_else(|| DEFAULT_MONTHLY_AMOUNT.to_string()))
            }
            PaypalEventKind::SubscriptionReactivated => amount.clone(),
            _ => None,
        };

        let payment = match (kind, amount) {
            (PaypalEventKind::SaleCompleted, Some(amount)) => {
                non_empty(Some(resource.id.as_str())).map(|transaction_id| PaymentDetails {
                    transaction_id,
                    amount,
                    currency: non_empty(Some(resource.amount.currency_code.as_str())),
                })
            }
            _ => None,
        };

        Ok(Some(NormalizedEvent {
            identity,
            name,
            is_anonymous: false,
            status: kind.target_status(),
            monthly_amount,
            payment,
            referred_by: parse_referrer(&resource.custom_id),
            payment_only: kind == PaypalEventKind::SaleCompleted,
        }))
    }
}

/// `custom_id` of the form `referrer:<email>`
fn parse_referrer(custom_id: &str) -> Option<String> {
    custom_id
        .split_once(':')
        .filter(|(tag, _)| *tag == "referrer")
        .and_then(|(_, referrer)| non_empty(Some(referrer)))
}

// =============================================================================
// CSV export row
// =============================================================================

/// One row of a donor export. `None` means the column is absent from the file,
/// `Some("")` means the column exists but the cell is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvRow {
    pub email: String,
    pub frequency: Option<String>,
    pub payment_status: Option<String>,
    pub name: Option<String>,
    pub anonymous: Option<String>,
}

impl CsvRow {
    /// Normalize a row. Non-recurring rows yield `Ok(None)` and never reach
    /// the reconciler.
    pub fn normalize(&self) -> Result<Option<NormalizedEvent>, ValidationError> {
        if let Some(frequency) = &self.frequency {
            if !is_recurring(frequency) {
                return Ok(None);
            }
        }

        let email = normalize_email(&self.email)?;
        let is_anonymous = self.anonymous.as_deref().is_some_and(parse_anonymous);
        let status = match &self.payment_status {
            Some(text) => MemberStatus::from_vendor_text(text),
            None => MemberStatus::Active,
        };

        Ok(Some(NormalizedEvent {
            name: display_name(self.name.as_deref(), is_anonymous),
            is_anonymous,
            ..NormalizedEvent::new(email, status)
        }))
    }
}

//! Timer form state, payload serialization and the status line.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::AppError;

/// Shown when a billable entry has no usable rate.
pub const MISSING_RATE_MESSAGE: &str = "Please provide a billing rate for billable time entries.";

/// Billing status of a time entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingStatus {
    Billable,
    NonBillable,
}

impl FromStr for BillingStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Billable" => Ok(Self::Billable),
            "NonBillable" => Ok(Self::NonBillable),
            other => Err(AppError::InvalidInput(format!(
                "unknown billing status '{other}' (expected Billable or NonBillable)"
            ))),
        }
    }
}

impl fmt::Display for BillingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Billable => f.write_str("Billable"),
            Self::NonBillable => f.write_str("NonBillable"),
        }
    }
}

/// What the form posts to the Timer API.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerPayload {
    pub billing_status: Option<BillingStatus>,
    pub billing_rate: Option<f64>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
    /// A rate was typed but is not a number.
    #[serde(skip)]
    pub rate_unparsed: bool,
}

impl TimerPayload {
    /// Validation message, if the payload must not be sent.
    pub fn validate(&self) -> Option<&'static str> {
        let rate_missing = self.billing_rate.is_none() || self.rate_unparsed;
        (self.billing_status == Some(BillingStatus::Billable) && rate_missing)
            .then_some(MISSING_RATE_MESSAGE)
    }
}

/// The timer form as the user filled it in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimerForm {
    billing_status: Option<BillingStatus>,
    billing_rate: String,
    fields: BTreeMap<String, String>,
}

impl TimerForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn billing_status(&self) -> Option<BillingStatus> {
        self.billing_status
    }

    pub fn billing_rate(&self) -> &str {
        &self.billing_rate
    }

    /// Change the billing status, showing or hiding the rate field.
    pub fn set_billing_status(&mut self, status: Option<BillingStatus>) {
        self.billing_status = status;
        self.show_billing_rate();
    }

    /// Type into the rate field. Ignored while the field is hidden.
    pub fn set_billing_rate(&mut self, rate: impl Into<String>) {
        if self.billing_rate_visible() {
            self.billing_rate = rate.into();
        }
    }

    /// Set any other form field.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    /// The rate field is only shown for billable entries.
    pub fn billing_rate_visible(&self) -> bool {
        self.billing_status == Some(BillingStatus::Billable)
    }

    /// Sync the rate field with the status; hiding it clears it.
    pub fn show_billing_rate(&mut self) {
        if !self.billing_rate_visible() {
            self.billing_rate.clear();
        }
    }

    /// Build the request payload.
    ///
    /// An empty rate becomes `null`, other rates are parsed as numbers.
    /// Every other field is carried through as typed.
    pub fn serialize(&self) -> TimerPayload {
        let rate = self.billing_rate.trim();
        let parsed = (!rate.is_empty()).then(|| rate.parse::<f64>().ok().filter(|r| r.is_finite()));
        TimerPayload {
            billing_status: self.billing_status,
            billing_rate: parsed.flatten(),
            fields: self.fields.clone(),
            rate_unparsed: matches!(parsed, Some(None)),
        }
    }

    /// Back to a blank form.
    pub fn reset(&mut self) {
        *self = Self::default();
        self.show_billing_rate();
    }
}

/// Kind of status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Success,
    Error,
}

/// The status line under the form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusLine {
    message: String,
    kind: Option<StatusKind>,
}

impl StatusLine {
    pub fn set(&mut self, message: impl Into<String>, kind: StatusKind) {
        self.message = message.into();
        self.kind = Some(kind);
    }

    pub fn clear(&mut self) {
        self.message.clear();
        self.kind = None;
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> Option<StatusKind> {
        self.kind
    }

    pub fn is_error(&self) -> bool {
        self.kind == Some(StatusKind::Error)
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

//! Identifier types for CasaPay entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new time-ordered identifier.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Create from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from string.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// Get the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id! {
    /// Unique identifier for a payer account.
    AccountId
}

uuid_id! {
    /// Unique identifier for an obligation (one account, one month).
    ObligationId
}

uuid_id! {
    /// Unique identifier for an invoice within an obligation.
    InvoiceId
}

uuid_id! {
    /// Unique identifier for a recharge (deposit of funds).
    RechargeId
}

uuid_id! {
    /// Unique identifier for a payment applied to an invoice.
    PaymentId
}

uuid_id! {
    /// Unique identifier for a manual-review flag.
    ReviewId
}

uuid_id! {
    /// Unique identifier for a stored notification.
    NotificationId
}

/// Contact handle used to resolve an account (E.164-style phone number).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Phone(String);

impl Phone {
    /// Create a new phone handle.
    pub fn new(number: impl Into<String>) -> Self {
        Self(number.into())
    }

    /// Get the number as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Basic format check: non-empty, digits with optional leading `+`.
    pub fn is_valid(&self) -> bool {
        let digits = self.0.strip_prefix('+').unwrap_or(&self.0);
        !digits.is_empty() && digits.len() <= 15 && digits.chars().all(|c| c.is_ascii_digit())
    }
}

impl fmt::Display for Phone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Phone {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Phone {
    fn from(s: String) -> Self {
        Self(s)
    }
}

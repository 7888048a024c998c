//! Request body validation
//!
//! Request bodies are deserialized into `Option` fields so that every problem
//! can be reported at once instead of failing on the first missing field.

use marketplace_common::{
    BillingInterval, BillingTerms, Error, FieldViolation, ResourceSpec, Result,
};
use serde::Deserialize;

/// Collects field violations for one request
#[derive(Debug, Default)]
pub struct Violations(Vec<FieldViolation>);

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldViolation::new(field, message));
    }

    /// Record a violation when `ok` is false; returns `ok`
    pub fn check(&mut self, ok: bool, field: &str, message: &str) -> bool {
        if !ok {
            self.add(field, message);
        }
        ok
    }

    /// Unwrap a required field, recording a violation when absent
    pub fn require<T>(&mut self, value: Option<T>, field: &str) -> Option<T> {
        if value.is_none() {
            self.add(field, format!("{field} is required"));
        }
        value
    }

    /// Check a string's character count
    pub fn length(&mut self, field: &str, value: &str, min: usize, max: usize, message: &str) -> bool {
        let len = value.chars().count();
        self.check((min..=max).contains(&len), field, message)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_result(self) -> Result<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(self.0))
        }
    }

    /// The validated value, or every recorded violation
    pub fn finish<T>(self, value: Option<T>) -> Result<T> {
        match value {
            Some(value) if self.0.is_empty() => Ok(value),
            _ => Err(Error::Validation(self.0)),
        }
    }
}

/// `prefix.name`, or just `name` at the top level
pub fn field(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

pub fn is_currency_code(value: &str) -> bool {
    value.len() == 3 && value.chars().all(|c| c.is_ascii_alphabetic())
}

pub fn is_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !value.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

pub fn is_http_url(value: &str) -> bool {
    value.starts_with("https://") || value.starts_with("http://")
}

/// Inclusive bounds for each resource dimension
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub cpu: (u32, u32),
    pub memory: (u32, u32),
    pub storage: (u32, u32),
}

/// What a cloud user may request for one deployment
pub const DEPLOYMENT_LIMITS: ResourceLimits = ResourceLimits {
    cpu: (1, 64),
    memory: (1, 256),
    storage: (10, 10_000),
};

/// What a provider node must offer at minimum
pub const PROVIDER_LIMITS: ResourceLimits = ResourceLimits {
    cpu: (1, u32::MAX),
    memory: (1, u32::MAX),
    storage: (10, u32::MAX),
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourcesInput {
    pub cpu: Option<i64>,
    pub memory: Option<i64>,
    pub storage: Option<i64>,
}

fn bounded(
    violations: &mut Violations,
    field: String,
    value: Option<i64>,
    (min, max): (u32, u32),
    label: &str,
    unit: &str,
) -> Option<u32> {
    let Some(value) = value else {
        violations.add(field, format!("{label} is required"));
        return None;
    };

    match u32::try_from(value) {
        Ok(v) if (min..=max).contains(&v) => Some(v),
        _ if max == u32::MAX => {
            violations.add(field, format!("{label} must be at least {min}{unit}"));
            None
        }
        _ => {
            violations.add(field, format!("{label} must be between {min} and {max}{unit}"));
            None
        }
    }
}

impl ResourcesInput {
    pub fn validate(
        &self,
        prefix: &str,
        limits: ResourceLimits,
        violations: &mut Violations,
    ) -> Option<ResourceSpec> {
        let cpu = bounded(
            violations,
            field(prefix, "cpu"),
            self.cpu,
            limits.cpu,
            "CPU",
            "",
        );
        let memory = bounded(
            violations,
            field(prefix, "memory"),
            self.memory,
            limits.memory,
            "Memory",
            " GB",
        );
        let storage = bounded(
            violations,
            field(prefix, "storage"),
            self.storage,
            limits.storage,
            "Storage",
            " GB",
        );

        Some(ResourceSpec {
            cpu: cpu?,
            memory: memory?,
            storage: storage?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingInput {
    pub plan_id: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub interval: Option<String>,
}

impl BillingInput {
    pub fn validate(&self, prefix: &str, violations: &mut Violations) -> Option<BillingTerms> {
        let plan_id = match self.plan_id.as_deref().map(str::trim) {
            Some(plan) if !plan.is_empty() => Some(plan.to_string()),
            _ => {
                violations.add(field(prefix, "planId"), "Plan ID is required");
                None
            }
        };

        let amount = match self.amount {
            Some(amount) if amount.is_finite() && amount >= 0.0 => Some(amount),
            _ => {
                violations.add(
                    field(prefix, "amount"),
                    "Amount must be a non-negative number",
                );
                None
            }
        };

        let currency = match self.currency.as_deref() {
            Some(code) if is_currency_code(code) => Some(code.to_uppercase()),
            _ => {
                violations.add(
                    field(prefix, "currency"),
                    "Currency must be a 3-letter code",
                );
                None
            }
        };

        let interval = match self.interval.as_deref().map(str::parse::<BillingInterval>) {
            Some(Ok(interval)) => Some(interval),
            Some(Err(message)) => {
                violations.add(field(prefix, "interval"), message);
                None
            }
            None => {
                violations.add(field(prefix, "interval"), "Billing interval is required");
                None
            }
        };

        Some(BillingTerms {
            plan_id: plan_id?,
            amount: amount?,
            currency: currency?,
            interval: interval?,
        })
    }
}

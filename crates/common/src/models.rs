//! Domain records shared by the store and the HTTP layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A platform user, keyed by the identity provider's subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Stable external identity
    pub subject_id: String,

    pub email: String,

    pub display_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture_url: Option<String>,

    pub notifications_enabled: bool,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create the record written on a subject's first successful login
    pub fn new(
        subject_id: String,
        email: String,
        display_name: String,
        picture_url: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            subject_id,
            email,
            display_name,
            picture_url,
            notifications_enabled: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Profile fields a user may change
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub display_name: Option<String>,
    pub picture_url: Option<String>,
    pub notifications_enabled: Option<bool>,
}

/// Lifecycle of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Active,
    Failed,
    Terminated,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Active => "active",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Terminated => "terminated",
        }
    }

    /// `pending -> active -> {failed, terminated}` and `pending -> failed`.
    /// Staying in the same state is always allowed.
    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        *self == next
            || matches!(
                (self, next),
                (Pending, Active) | (Pending, Failed) | (Active, Failed) | (Active, Terminated)
            )
    }

    pub fn transition_to(&self, next: DeploymentStatus) -> Result<DeploymentStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeploymentStatus::Pending),
            "active" => Ok(DeploymentStatus::Active),
            "failed" => Ok(DeploymentStatus::Failed),
            "terminated" => Ok(DeploymentStatus::Terminated),
            other => Err(format!(
                "Status must be one of pending, active, failed, terminated (got {other})"
            )),
        }
    }
}

/// Compute resources requested or offered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// CPU cores
    pub cpu: u32,

    /// Memory in GB
    pub memory: u32,

    /// Storage in GB
    pub storage: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Hourly,
    Daily,
    Monthly,
}

impl FromStr for BillingInterval {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(BillingInterval::Hourly),
            "daily" => Ok(BillingInterval::Daily),
            "monthly" => Ok(BillingInterval::Monthly),
            _ => Err("Billing interval must be hourly, daily, or monthly".to_string()),
        }
    }
}

/// Billing terms attached to a deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingTerms {
    pub plan_id: String,
    pub amount: f64,
    pub currency: String,
    pub interval: BillingInterval,
}

/// A cloud user's virtual deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: String,

    /// Subject that created the deployment; never changes
    pub owner_subject_id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub status: DeploymentStatus,

    pub resources: ResourceSpec,

    pub billing: BillingTerms,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    /// Create a new `pending` deployment
    pub fn new(
        id: String,
        owner_subject_id: String,
        name: String,
        description: Option<String>,
        resources: ResourceSpec,
        billing: BillingTerms,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_subject_id,
            name,
            description,
            status: DeploymentStatus::Pending,
            resources,
            billing,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Fields of a deployment that may change after creation.
/// The owner is deliberately absent.
#[derive(Debug, Clone, Default)]
pub struct DeploymentPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<DeploymentStatus>,
    pub resources: Option<ResourceSpec>,
    pub billing: Option<BillingTerms>,
}

impl DeploymentPatch {
    pub fn status(status: DeploymentStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderRequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl ProviderRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderRequestStatus::Pending => "pending",
            ProviderRequestStatus::Approved => "approved",
            ProviderRequestStatus::Rejected => "rejected",
        }
    }

    /// Only pending requests may be decided; decisions are final.
    pub fn transition_to(&self, next: ProviderRequestStatus) -> Result<ProviderRequestStatus> {
        if *self == next || *self == ProviderRequestStatus::Pending {
            Ok(next)
        } else {
            Err(Error::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for ProviderRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderRequestStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProviderRequestStatus::Pending),
            "approved" => Ok(ProviderRequestStatus::Approved),
            "rejected" => Ok(ProviderRequestStatus::Rejected),
            _ => Err("Invalid status value".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDetails {
    pub location: String,
    pub resources: ResourceSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Application to become a resource provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRequest {
    pub id: String,

    pub requesting_subject_id: String,

    pub status: ProviderRequestStatus,

    pub node_details: NodeDetails,

    pub contact_info: ContactInfo,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ProviderRequest {
    pub fn new(
        id: String,
        requesting_subject_id: String,
        node_details: NodeDetails,
        contact_info: ContactInfo,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            requesting_subject_id,
            status: ProviderRequestStatus::Pending,
            node_details,
            contact_info,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProviderRequestPatch {
    pub status: Option<ProviderRequestStatus>,
}

/// Cosmetic platform configuration managed by operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorSettings {
    pub dashboard_title: String,
    pub logo_url: String,
    pub primary_color: String,
    pub secondary_color: String,

    #[serde(default)]
    pub featured_apps: Vec<String>,

    #[serde(default)]
    pub maintenance_mode: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            dashboard_title: "ThreeFold Cloud Marketplace".to_string(),
            logo_url: "https://example.com/logo.png".to_string(),
            primary_color: "#3498db".to_string(),
            secondary_color: "#2ecc71".to_string(),
            featured_apps: vec!["app1".to_string(), "app2".to_string(), "app3".to_string()],
            maintenance_mode: false,
            updated_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deployment_transitions() {
        use DeploymentStatus::*;

        assert!(Pending.can_transition_to(Active));
        assert!(Pending.can_transition_to(Failed));
        assert!(Active.can_transition_to(Terminated));
        assert!(Active.can_transition_to(Failed));
        assert!(Active.can_transition_to(Active));

        assert!(!Pending.can_transition_to(Terminated));
        assert!(!Active.can_transition_to(Pending));
        assert!(!Terminated.can_transition_to(Active));
        assert!(!Terminated.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Active));
    }

    #[test]
    fn test_terminated_is_terminal() {
        let err = DeploymentStatus::Terminated
            .transition_to(DeploymentStatus::Active)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(
            err.to_string(),
            "Invalid status transition from terminated to active"
        );
    }

    #[test]
    fn test_provider_request_decisions_are_final() {
        use ProviderRequestStatus::*;

        assert_eq!(Pending.transition_to(Approved).unwrap(), Approved);
        assert_eq!(Pending.transition_to(Rejected).unwrap(), Rejected);
        assert_eq!(Approved.transition_to(Approved).unwrap(), Approved);
        assert!(Approved.transition_to(Rejected).is_err());
        assert!(Rejected.transition_to(Pending).is_err());
    }

    #[test]
    fn test_deployment_json_shape() {
        let deployment = Deployment::new(
            "dep-1".to_string(),
            "auth0|alice".to_string(),
            "web-1".to_string(),
            None,
            ResourceSpec {
                cpu: 2,
                memory: 4,
                storage: 100,
            },
            BillingTerms {
                plan_id: "basic".to_string(),
                amount: 10.0,
                currency: "USD".to_string(),
                interval: BillingInterval::Monthly,
            },
        );

        let json = serde_json::to_value(&deployment).unwrap();
        assert_eq!(json["ownerSubjectId"], "auth0|alice");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["resources"]["cpu"], 2);
        assert_eq!(json["billing"]["planId"], "basic");
        assert_eq!(json["billing"]["interval"], "monthly");
        assert!(json.get("description").is_none());
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(
            "approved".parse::<ProviderRequestStatus>().unwrap(),
            ProviderRequestStatus::Approved
        );
        assert!("revoked".parse::<ProviderRequestStatus>().is_err());
        assert!("weekly".parse::<BillingInterval>().is_err());
    }
}

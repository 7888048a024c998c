//! Domain types shared by the marketplace store and API.

pub mod error;
pub mod identity;
pub mod models;
pub mod pagination;
pub mod pricing;

pub use error::{Error, FieldViolation, Result};
pub use identity::{assert_ownership, require_role, IdentityContext, Owned, Role};
pub use models::{
    BillingInterval, BillingTerms, ContactInfo, Deployment, DeploymentPatch, DeploymentStatus,
    NodeDetails, OperatorSettings, ProviderRequest, ProviderRequestPatch, ProviderRequestStatus,
    ResourceSpec, User, UserPatch,
};
pub use pagination::{normalize, Page, PageRequest, PaginationMeta};
pub use pricing::{compute_discount, DiscountTier, PricingConfiguration, Quote, UnitPrice};

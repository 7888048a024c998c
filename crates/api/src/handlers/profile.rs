//! The caller's own user record, shared by the user and provider dashboards

use marketplace_common::{Error, Result, User, UserPatch};
use serde::Deserialize;

use crate::validation::{is_http_url, Violations};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    pub picture_url: Option<String>,
    pub notifications_enabled: Option<bool>,
}

impl UpdateProfileRequest {
    fn into_patch(self) -> Result<UserPatch> {
        let mut violations = Violations::new();

        let display_name = self.display_name.map(|name| name.trim().to_string());
        if let Some(name) = &display_name {
            violations.length(
                "displayName",
                name,
                1,
                100,
                "Display name must be between 1 and 100 characters",
            );
        }
        if let Some(url) = &self.picture_url {
            violations.check(
                is_http_url(url),
                "pictureUrl",
                "Picture URL must be an http(s) URL",
            );
        }

        violations.finish(Some(UserPatch {
            display_name,
            picture_url: self.picture_url,
            notifications_enabled: self.notifications_enabled,
        }))
    }
}

pub async fn load(state: &AppState, subject_id: &str) -> Result<User> {
    state
        .store
        .users
        .get_by_id(subject_id)
        .await?
        .ok_or_else(|| Error::not_found("User profile", subject_id))
}

pub async fn update(state: &AppState, subject_id: &str, body: UpdateProfileRequest) -> Result<User> {
    let patch = body.into_patch()?;
    state.store.users.update(subject_id, patch).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_fields() {
        let err = UpdateProfileRequest {
            display_name: Some("   ".to_string()),
            picture_url: Some("ftp://example.com/me.png".to_string()),
            notifications_enabled: None,
        }
        .into_patch()
        .unwrap_err();

        let Error::Validation(list) = err else {
            panic!("expected validation failure");
        };
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_partial_patch() {
        let patch = UpdateProfileRequest {
            notifications_enabled: Some(false),
            ..Default::default()
        }
        .into_patch()
        .unwrap();

        assert_eq!(patch.notifications_enabled, Some(false));
        assert!(patch.display_name.is_none());
    }
}

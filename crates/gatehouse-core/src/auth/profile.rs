use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Resident,
    Security,
    /// A role this client does not know about
    #[serde(other)]
    Unknown,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Resident => "resident",
            Role::Security => "security",
            Role::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cached user profile as persisted under `userData`.
///
/// Advisory only: the server stays the authority on role and assignment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub building_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<String>,
    #[serde(
        default,
        rename = "appartementId",
        alias = "apartmentId",
        skip_serializing_if = "Option::is_none"
    )]
    pub apartment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_temporary: Option<bool>,
}

/// Fields to merge over a cached profile. `None` keeps the cached value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePatch {
    pub full_name: Option<String>,
    pub role: Option<Role>,
    pub building_id: Option<String>,
    pub block_id: Option<String>,
    pub apartment_id: Option<String>,
    pub is_temporary: Option<bool>,
}

impl ProfilePatch {
    pub fn building(building_id: impl Into<String>) -> Self {
        Self {
            building_id: Some(building_id.into()),
            ..Self::default()
        }
    }

    pub fn block(block_id: impl Into<String>) -> Self {
        Self {
            block_id: Some(block_id.into()),
            ..Self::default()
        }
    }

    pub fn apartment(apartment_id: impl Into<String>) -> Self {
        Self {
            apartment_id: Some(apartment_id.into()),
            ..Self::default()
        }
    }
}

/// Where a user stands in account setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnboardingStep {
    SelectRole,
    SelectBuilding,
    SelectBlock,
    SelectApartment,
    Complete,
}

impl UserProfile {
    /// Merge a patch over this profile, keeping fields the patch leaves out.
    pub fn apply(&mut self, patch: ProfilePatch) {
        if let Some(full_name) = patch.full_name {
            self.full_name = Some(full_name);
        }
        if let Some(role) = patch.role {
            self.role = Some(role);
        }
        if let Some(building_id) = patch.building_id {
            self.building_id = Some(building_id);
        }
        if let Some(block_id) = patch.block_id {
            self.block_id = Some(block_id);
        }
        if let Some(apartment_id) = patch.apartment_id {
            self.apartment_id = Some(apartment_id);
        }
        if let Some(is_temporary) = patch.is_temporary {
            self.is_temporary = Some(is_temporary);
        }
    }

    /// Next setup step. Residents need building, block and apartment and a
    /// non-temporary account; security staff only need a building.
    pub fn onboarding_step(&self) -> OnboardingStep {
        match self.role {
            Some(Role::Resident) => {
                if self.building_id.is_none() {
                    OnboardingStep::SelectBuilding
                } else if self.block_id.is_none() {
                    OnboardingStep::SelectBlock
                } else if self.apartment_id.is_none() || self.is_temporary != Some(false) {
                    OnboardingStep::SelectApartment
                } else {
                    OnboardingStep::Complete
                }
            }
            Some(Role::Security) => {
                if self.building_id.is_none() {
                    OnboardingStep::SelectBuilding
                } else {
                    OnboardingStep::Complete
                }
            }
            Some(Role::Unknown) | None => OnboardingStep::SelectRole,
        }
    }
}

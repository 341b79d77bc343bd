use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

const MAX_EMAIL_LEN: usize = 254;
const MAX_MOTIVATION_LEN: usize = 5000;

// Newsletter signup body
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct SubscribeRequest {
    pub email: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeResponse {
    pub subscribed: bool,
    pub already_subscribed: bool,
}

// Recruitment application body
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ApplicationRequest {
    pub name: String,
    pub email: String,
    pub subteam: String,
    pub motivation: String,
}

// Stored application, keyed by its id
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRecord {
    pub name: String,
    pub email: String,
    pub subteam: String,
    pub motivation: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ApplicationCreated {
    pub id: u64,
}

/// Trim and lowercase an address, rejecting anything that is clearly not one
pub fn normalize_email(raw: &str) -> Result<String, ApiError> {
    let email = raw.trim().to_lowercase();
    let invalid = || ApiError::Validation("A valid email address is required".to_string());

    if email.is_empty() || email.len() > MAX_EMAIL_LEN || email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    // needs a dot with something on both sides
    match domain.rsplit_once('.') {
        Some((host, tld)) if !host.is_empty() && !tld.is_empty() => Ok(email),
        _ => Err(invalid()),
    }
}

fn required(field: &str, value: &str) -> Result<String, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::Validation(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

impl ApplicationRequest {
    /// Validate and build the record to store
    pub fn into_record(self, now: DateTime<Utc>) -> Result<ApplicationRecord, ApiError> {
        let name = required("name", &self.name)?;
        let email = normalize_email(&self.email)?;
        let subteam = required("subteam", &self.subteam)?;
        let motivation = required("motivation", &self.motivation)?;
        if motivation.chars().count() > MAX_MOTIVATION_LEN {
            return Err(ApiError::Validation(format!(
                "motivation must be at most {} characters",
                MAX_MOTIVATION_LEN
            )));
        }

        Ok(ApplicationRecord {
            name,
            email,
            subteam,
            motivation,
            submitted_at: now,
        })
    }
}

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::claims::RawClaims;

/// Identity attribute to the user-info claims it is read from, in order of
/// preference.
pub type AttributeMap = BTreeMap<String, Vec<String>>;

/// Attribute mapping used when nothing is configured.
pub fn default_attribute_map() -> AttributeMap {
    let defaults: [(&str, &[&str]); 8] = [
        ("name", &["name"]),
        ("email", &["email", "unique_name"]),
        ("nickname", &["preferred_username"]),
        ("first_name", &["given_name"]),
        ("last_name", &["family_name"]),
        ("gender", &["gender"]),
        ("image", &["picture"]),
        ("phone", &["phone_number"]),
    ];

    defaults
        .into_iter()
        .map(|(attribute, claims)| {
            (
                attribute.to_string(),
                claims.iter().map(|c| c.to_string()).collect(),
            )
        })
        .collect()
}

/// Normalizes provider quirks in a copy of the user-info claims:
/// - a string `email_verified` becomes a boolean
/// - `gender` is dropped
/// - a blank `email` falls back to `unique_name`
pub fn amend(userinfo: &RawClaims) -> RawClaims {
    let mut amended = userinfo.clone();

    if let Some(Value::String(verified)) = amended.get("email_verified") {
        let verified = verified == "true";
        amended.insert("email_verified".to_string(), Value::Bool(verified));
    }

    amended.remove("gender");

    let email_blank = amended
        .get("email")
        .is_none_or(|email| email.is_null() || email.as_str().is_some_and(str::is_empty));
    if email_blank {
        if let Some(unique_name) = amended.get("unique_name").cloned() {
            amended.insert("email".to_string(), unique_name);
        }
    }

    amended
}

/// Maps user-info claims to identity attributes. The configured map extends
/// and overrides [`default_attribute_map`]. The first candidate that is
/// neither null nor an empty string wins, so `false` is kept.
pub fn map_attributes(userinfo: &RawClaims, overrides: &AttributeMap) -> Map<String, Value> {
    let mut mapping = default_attribute_map();
    mapping.extend(overrides.clone());

    let amended = amend(userinfo);
    mapping
        .into_iter()
        .map(|(attribute, candidates)| {
            let value = candidates
                .iter()
                .filter_map(|claim| amended.get(claim))
                .find(|value| !value.is_null() && value.as_str() != Some(""))
                .cloned()
                .unwrap_or(Value::Null);
            (attribute, value)
        })
        .collect()
}

/// Tokens of a completed login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub id_token: Option<String>,
    pub sid: Option<String>,
    pub token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Extra {
    pub raw_info: RawClaims,
}

/// Application facing identity of an authenticated visitor.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuthenticatedIdentity {
    pub uid: String,
    pub info: Map<String, Value>,
    pub credentials: Credentials,
    pub extra: Extra,
}

impl AuthenticatedIdentity {
    /// Builds the identity from user-info claims. Returns `None` without a
    /// `sub` claim.
    pub fn from_userinfo(
        userinfo: RawClaims,
        attribute_map: &AttributeMap,
        credentials: Credentials,
    ) -> Option<Self> {
        let uid = userinfo.get("sub")?.as_str()?.to_string();

        let mut info = map_attributes(&userinfo, attribute_map);
        let website = userinfo.get("website").cloned().unwrap_or(Value::Null);
        info.insert("urls".to_string(), json!({ "website": website }));

        Some(Self {
            uid,
            info,
            credentials,
            extra: Extra { raw_info: userinfo },
        })
    }
}

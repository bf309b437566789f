//! Form field mapping: user profile → petition form inputs.
//!
//! A petition type (configured through the web API) may pin exact form field
//! names per profile key; otherwise generic selector candidates derived from
//! the profile key are tried in order.

use crate::config::UserProfile;
use crate::store::PetitionType;

/// One value to place into the form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    /// Profile key: `first_name`, `last_name`, `email`, `zip_code`, ...
    pub key: &'static str,
    pub value: String,
    /// Exact form field name from the petition type's mapping, if any.
    pub form_name: Option<String>,
}

/// Build the fill list from the profile and an optional petition type.
///
/// Empty profile values are omitted rather than filled blank.
pub fn build_field_mapping(profile: &UserProfile, petition_type: Option<&PetitionType>) -> Vec<FormField> {
    let mapping = petition_type.and_then(|pt| pt.field_mapping.as_ref());

    let pairs: [(&'static str, Option<String>); 8] = [
        ("first_name", non_empty(&profile.first_name)),
        ("last_name", non_empty(&profile.last_name)),
        ("email", non_empty(&profile.email)),
        ("zip_code", non_empty(&profile.zip_code)),
        ("phone", profile.phone.clone()),
        ("address", profile.address.clone()),
        ("city", profile.city.clone()),
        ("state", profile.state.clone()),
    ];

    pairs
        .into_iter()
        .filter_map(|(key, value)| {
            let value = value?;
            let form_name = mapping
                .and_then(|m| m.get(key))
                .and_then(|v| v.as_str())
                .map(String::from);
            Some(FormField { key, value, form_name })
        })
        .collect()
}

/// CSS selector candidates for a field, most specific first.
pub fn selectors_for(field: &FormField) -> Vec<String> {
    if let Some(name) = &field.form_name {
        return vec![
            format!(r#"input[name="{name}"]"#),
            format!(r#"input[id="{name}"]"#),
            format!(r#"textarea[name="{name}"]"#),
        ];
    }

    let key = field.key;
    let spaced = key.replace('_', " ");
    vec![
        format!(r#"input[name="{key}"]"#),
        format!(r#"input[id="{key}"]"#),
        format!(r#"input[name*="{key}"]"#),
        format!(r#"input[id*="{key}"]"#),
        format!(r#"input[placeholder*="{spaced}"]"#),
    ]
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() { None } else { Some(s.to_string()) }
}

//! Merge of the authentication and profile record sets into [`User`]s.
//!
//! Auth records own id, email and joined-at. Profiles own the display
//! fields. Either side may be missing for a given id; every id seen on
//! either side, plus the session identity, yields exactly one user.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use teamdesk_shared::constants::{ID_FRAGMENT_LEN, PLACEHOLDER_EMAIL_DOMAIN, UNKNOWN_USER};
use teamdesk_shared::models::{AuthRecord, ProfileRecord, User};
use uuid::Uuid;

use crate::cache::{compare, Cached};

impl Cached for User {
    const ASCENDING: bool = false;

    fn key(&self) -> Uuid {
        self.id
    }

    fn sort_key(&self) -> DateTime<Utc> {
        self.joined_at
    }
}

/// First [`ID_FRAGMENT_LEN`] characters of the id's simple form.
pub fn id_fragment(id: Uuid) -> String {
    id.simple().to_string().chars().take(ID_FRAGMENT_LEN).collect()
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn local_part(email: &str) -> Option<&str> {
    email.split('@').next().map(str::trim).filter(|p| !p.is_empty())
}

/// Display name precedence: profile username, email local-part, id fragment.
pub fn resolve_display_name(profile: Option<&ProfileRecord>, email: Option<&str>, id: Uuid) -> String {
    if let Some(name) = non_blank(profile.and_then(|p| p.username.as_deref())) {
        return name.to_string();
    }
    if let Some(local) = non_blank(email).and_then(local_part) {
        return local.to_string();
    }
    id_fragment(id)
}

/// Deterministic stand-in address for users with no known email.
pub fn placeholder_email(display_name: &str) -> String {
    let mut slug = String::with_capacity(display_name.len());
    for c in display_name.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('.') {
            slug.push('.');
        }
    }
    let slug = slug.trim_end_matches('.');
    let slug = if slug.is_empty() { "user" } else { slug };
    format!("{slug}@{PLACEHOLDER_EMAIL_DOMAIN}")
}

fn from_auth(auth: &AuthRecord, profile: Option<&ProfileRecord>) -> User {
    let email = non_blank(auth.email.as_deref());
    let username = resolve_display_name(profile, email, auth.id);
    User {
        id: auth.id,
        email: email.map_or_else(|| placeholder_email(&username), str::to_string),
        username,
        phone: profile.and_then(|p| p.phone.clone()),
        joined_at: auth.created_at,
        has_profile: profile.is_some(),
    }
}

fn from_profile(profile: &ProfileRecord) -> User {
    let username = resolve_display_name(Some(profile), None, profile.id);
    User {
        id: profile.id,
        email: placeholder_email(&username),
        username,
        phone: profile.phone.clone(),
        joined_at: profile.created_at,
        has_profile: true,
    }
}

/// Build the user directory.
///
/// The result has unique ids and is ordered by joined-at, newest first.
pub fn resolve_users(
    auth: &[AuthRecord],
    profiles: &[ProfileRecord],
    session: Option<&AuthRecord>,
) -> Vec<User> {
    let by_id: HashMap<Uuid, &ProfileRecord> = profiles.iter().map(|p| (p.id, p)).collect();
    let mut seen = HashSet::new();
    let mut users = Vec::with_capacity(auth.len() + profiles.len() + 1);

    for record in auth.iter().chain(session) {
        if seen.insert(record.id) {
            users.push(from_auth(record, by_id.get(&record.id).copied()));
        }
    }
    for profile in profiles {
        if seen.insert(profile.id) {
            users.push(from_profile(profile));
        }
    }

    users.sort_by(compare);
    users
}

/// Display name of `id` in `users`, or the unknown-user label.
pub fn display_name(users: &[User], id: Uuid) -> String {
    users
        .iter()
        .find(|u| u.id == id)
        .map_or_else(|| UNKNOWN_USER.to_string(), |u| u.username.clone())
}

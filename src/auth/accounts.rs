//! Login, registration, profiles and user administration

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::password::{validate_new_password, PasswordHasher};
use super::session::{Role, SessionSnapshot};
use super::AuthError;
use crate::store::{Credential, ResetTokenStore, SiteConfigStore, UserProfile, UserStore};

#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    pub password: String,
    pub confirm_password: String,
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Partial profile edit; absent fields are left alone
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub alert_email: Option<String>,
    pub notifications_enabled: Option<bool>,
}

/// One row of the admin user listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserSummary {
    pub username: String,
    pub name: String,
    pub email: Option<String>,
    pub role: Role,
    pub notifications_enabled: bool,
}

pub fn is_valid_email(email: &str) -> bool {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s.]+$").ok())
        .as_ref()
        .map(|re| re.is_match(email))
        .unwrap_or(false)
}

pub struct Accounts<'a> {
    data_dir: &'a Path,
    hasher: PasswordHasher,
    allowed_domain: Option<&'a str>,
}

impl<'a> Accounts<'a> {
    pub fn new(data_dir: &'a Path, hasher: PasswordHasher) -> Self {
        Self {
            data_dir,
            hasher,
            allowed_domain: None,
        }
    }

    /// Only emails ending in `domain` may register
    pub fn with_allowed_domain(mut self, domain: Option<&'a str>) -> Self {
        self.allowed_domain = domain.filter(|d| !d.is_empty());
        self
    }

    fn site(&self) -> SiteConfigStore {
        SiteConfigStore::new(self.data_dir)
    }

    fn users(&self) -> UserStore {
        UserStore::new(self.data_dir)
    }

    pub fn login(&self, username: &str, password: &str) -> Result<SessionSnapshot, AuthError> {
        let site = self.site().load();
        let username = username.trim();
        let credential = site
            .credential(username)
            .ok_or(AuthError::InvalidCredentials)?;

        if !self.hasher.verify(password, &credential.password) {
            tracing::info!(username = %username, "Failed login");
            return Err(AuthError::InvalidCredentials);
        }

        tracing::info!(username = %username, "Login");
        Ok(SessionSnapshot::from_credential(username, credential))
    }

    /// Create a regular user in `config.yaml` and its profile in
    /// `usuarios.json`
    pub fn register(&self, registration: Registration) -> Result<SessionSnapshot, AuthError> {
        let username = registration.username.trim().to_string();
        let email = registration.email.trim().to_string();

        if username.is_empty() || registration.first_name.trim().is_empty() {
            return Err(AuthError::InvalidPassword(
                "Username and first name are required".to_string(),
            ));
        }
        if !is_valid_email(&email) {
            return Err(AuthError::InvalidEmail(email));
        }
        if let Some(domain) = self.allowed_domain {
            if !email.to_ascii_lowercase().ends_with(&domain.to_ascii_lowercase()) {
                return Err(AuthError::EmailDomainNotAllowed(domain.to_string()));
            }
        }
        validate_new_password(&registration.password, &registration.confirm_password)?;

        let credential = Credential {
            email: Some(email.clone()),
            first_name: Some(registration.first_name.trim().to_string()),
            last_name: registration
                .last_name
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty()),
            password: self.hasher.hash(&registration.password)?,
            roles: None,
            ..Default::default()
        };
        let snapshot = SessionSnapshot::from_credential(&username, &credential);

        self.site().update(|config| {
            let usernames = &mut config.credentials.usernames;
            if usernames.contains_key(&username) {
                return Err(AuthError::UserExists(username.clone()));
            }
            let email_taken = usernames.values().any(|c| {
                c.email
                    .as_deref()
                    .is_some_and(|e| e.eq_ignore_ascii_case(&email))
            });
            if email_taken {
                return Err(AuthError::UserExists(email.clone()));
            }
            usernames.insert(username.clone(), credential);
            Ok(())
        })??;

        self.users().upsert(UserProfile::new(
            snapshot.name.clone(),
            email.clone(),
            registration.notifications_enabled,
        ))?;

        tracing::info!(username = %username, "User registered");
        Ok(snapshot)
    }

    /// Profile of the signed-in user, if they have one
    pub fn profile(&self, user: &SessionSnapshot) -> Result<UserProfile, AuthError> {
        user.email
            .as_deref()
            .and_then(|email| self.users().find(email))
            .ok_or_else(|| AuthError::UnknownUser(user.username.clone()))
    }

    /// Apply `update` to the user's profile, creating it when missing
    pub fn update_profile(
        &self,
        user: &SessionSnapshot,
        update: ProfileUpdate,
    ) -> Result<UserProfile, AuthError> {
        let login_email = user
            .email
            .clone()
            .ok_or_else(|| AuthError::InvalidEmail("account has no login email".to_string()))?;

        let mut profile = self
            .users()
            .find(&login_email)
            .unwrap_or_else(|| UserProfile::new(user.name.clone(), login_email, false));

        if let Some(name) = update.name {
            let name = name.trim();
            if !name.is_empty() {
                profile.name = name.to_string();
            }
        }
        if let Some(alert_email) = update.alert_email {
            let alert_email = alert_email.trim();
            if !is_valid_email(alert_email) {
                return Err(AuthError::InvalidEmail(alert_email.to_string()));
            }
            profile.alert_email = Some(alert_email.to_string());
        }
        if let Some(enabled) = update.notifications_enabled {
            profile.notifications_enabled = enabled;
        }

        self.users().upsert(profile.clone())?;
        Ok(profile)
    }

    /// Change the password after checking the current one. Callers end the
    /// user's sessions afterwards.
    pub fn change_password(
        &self,
        username: &str,
        current: &str,
        new_password: &str,
        confirm: &str,
    ) -> Result<(), AuthError> {
        if current.is_empty() {
            return Err(AuthError::InvalidPassword(
                "Current password is required".to_string(),
            ));
        }
        validate_new_password(new_password, confirm)?;
        if new_password == current {
            return Err(AuthError::InvalidPassword(
                "New password must differ from the current one".to_string(),
            ));
        }

        let site = self.site().load();
        let credential = site
            .credential(username)
            .ok_or_else(|| AuthError::UnknownUser(username.to_string()))?;
        if !self.hasher.verify(current, &credential.password) {
            return Err(AuthError::InvalidPassword(
                "Current password is incorrect".to_string(),
            ));
        }

        let hash = self.hasher.hash(new_password)?;
        self.site().update(|config| {
            if let Some(credential) = config.credentials.usernames.get_mut(username) {
                credential.password = hash;
            }
        })?;

        tracing::info!(username = %username, "Password changed");
        Ok(())
    }

    pub fn list_users(&self) -> Vec<UserSummary> {
        let site = self.site().load();
        let profiles = self.users().load();

        site.credentials
            .usernames
            .iter()
            .map(|(username, credential)| {
                let notifications_enabled = credential
                    .email
                    .as_deref()
                    .and_then(|email| {
                        profiles
                            .iter()
                            .find(|p| p.login_email.eq_ignore_ascii_case(email))
                    })
                    .is_some_and(|p| p.notifications_enabled);
                let snapshot = SessionSnapshot::from_credential(username, credential);

                UserSummary {
                    username: snapshot.username,
                    name: snapshot.name,
                    email: snapshot.email,
                    role: snapshot.role,
                    notifications_enabled,
                }
            })
            .collect()
    }

    /// Delete a regular user along with their profile and reset tokens
    pub fn delete_user(&self, actor: &SessionSnapshot, username: &str) -> Result<(), AuthError> {
        if actor.username == username {
            return Err(AuthError::Forbidden(
                "You cannot delete your own account".to_string(),
            ));
        }

        let removed = self.site().update(|config| {
            let usernames = &mut config.credentials.usernames;
            let is_admin = match usernames.get(username) {
                Some(c) => c.is_admin(),
                None => return Err(AuthError::UnknownUser(username.to_string())),
            };
            if is_admin {
                return Err(AuthError::Forbidden(
                    "Administrator accounts cannot be deleted".to_string(),
                ));
            }
            Ok(usernames.remove(username))
        })??;

        if let Some(email) = removed.and_then(|c| c.email) {
            let profiles = self.users().remove(&email)?;
            tracing::debug!(username = %username, profiles, "Removed notification profile");
        }
        let tokens = ResetTokenStore::new(self.data_dir).remove_for_user(username)?;

        tracing::info!(username = %username, by = %actor.username, tokens, "User deleted");
        Ok(())
    }
}

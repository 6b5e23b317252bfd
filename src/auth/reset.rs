//! Single-use, time-boxed password reset links

use std::path::Path;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;

use super::password::{validate_new_password, PasswordHasher};
use super::AuthError;
use crate::alerts::digest::escape_html;
use crate::alerts::Notifier;
use crate::store::{ResetToken, ResetTokenStore, SiteConfigStore, UserStore};

pub const RESET_TOKEN_TTL_MINUTES: i64 = 15;

const TOKEN_BYTES: usize = 32;

pub struct ResetFlow<'a> {
    data_dir: &'a Path,
    notifier: &'a dyn Notifier,
    hasher: PasswordHasher,
    base_url: &'a str,
}

impl<'a> ResetFlow<'a> {
    pub fn new(
        data_dir: &'a Path,
        notifier: &'a dyn Notifier,
        hasher: PasswordHasher,
        base_url: &'a str,
    ) -> Self {
        Self {
            data_dir,
            notifier,
            hasher,
            base_url,
        }
    }

    /// Issue a token for `username` and email the link.
    ///
    /// Returns `None` when no email can be resolved for the name; callers
    /// should not reveal the difference to the requester.
    pub async fn request(
        &self,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ResetToken>, AuthError> {
        let username = username.trim();
        let Some(email) = self.resolve_email(username) else {
            tracing::info!(username = %username, "Reset requested for unknown user");
            return Ok(None);
        };

        let token = ResetToken {
            token: generate_token(),
            username: username.to_string(),
            email,
            expiry: now + Duration::minutes(RESET_TOKEN_TTL_MINUTES),
        };
        ResetTokenStore::new(self.data_dir).insert(&token, now)?;

        let link = format!("{}/?token={}", self.base_url.trim_end_matches('/'), token.token);
        self.notifier
            .send(
                &token.email,
                "Restablece tu contraseña de PowerLogic Monitor",
                &render_reset_email(username, &link),
            )
            .await?;

        tracing::info!(username = %username, expiry = %token.expiry, "Reset link sent");
        Ok(Some(token))
    }

    /// Credential email first, then a `usuarios.json` entry whose login email
    /// equals the given name
    fn resolve_email(&self, username: &str) -> Option<String> {
        if username.is_empty() {
            return None;
        }

        let site = SiteConfigStore::new(self.data_dir).load();
        if let Some(credential) = site.credential(username) {
            return credential
                .email
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(String::from);
        }

        UserStore::new(self.data_dir).find(username).and_then(|u| {
            u.alert_email
                .filter(|e| !e.trim().is_empty())
                .or(Some(u.login_email))
                .filter(|e| !e.trim().is_empty())
        })
    }

    /// Set a new password through `token`.
    ///
    /// The token is taken out of the store before anything else happens and
    /// is only put back when the new password is rejected, so it can never
    /// set a password twice.
    pub fn redeem(
        &self,
        token: &str,
        new_password: &str,
        confirm: &str,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let tokens = ResetTokenStore::new(self.data_dir);
        let reset = tokens.take_valid(token, now)?.ok_or(AuthError::InvalidToken)?;

        if let Err(e) = validate_new_password(new_password, confirm) {
            tokens.insert(&reset, now)?;
            return Err(e);
        }
        let hash = self.hasher.hash(new_password)?;

        let updated = SiteConfigStore::new(self.data_dir).update(|config| {
            match config.credentials.usernames.get_mut(&reset.username) {
                Some(credential) => {
                    credential.password = hash;
                    true
                }
                None => false,
            }
        })?;
        if !updated {
            return Err(AuthError::UnknownUser(reset.username));
        }

        tracing::info!(username = %reset.username, "Password reset completed");
        Ok(reset.username)
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn render_reset_email(username: &str, link: &str) -> String {
    let username = escape_html(username);
    let link = escape_html(link);
    format!(
        "<h2>Restablecimiento de Contraseña</h2>\
         <p>Hola {username},</p>\
         <p>Hemos recibido una solicitud para restablecer la contraseña de tu cuenta.</p>\
         <p>Haz clic en el siguiente enlace para establecer una nueva contraseña:</p>\
         <p><a href=\"{link}\">{link}</a></p>\
         <p>Si no solicitaste un restablecimiento de contraseña, ignora este correo electrónico.</p>\
         <p>Este enlace es válido por {RESET_TOKEN_TTL_MINUTES} minutos.</p>\
         <p>Gracias,<br>El equipo de PowerLogic Monitor</p>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::digest::tests::RecordingNotifier;
    use crate::store::{Credential, UserProfile};
    use tempfile::TempDir;

    fn seed(dir: &Path) {
        SiteConfigStore::new(dir)
            .update(|c| {
                c.credentials.usernames.insert(
                    "ana".to_string(),
                    Credential {
                        email: Some("ana@ing.unrc.edu.ar".to_string()),
                        password: bcrypt::hash("vieja", 4).unwrap(),
                        ..Default::default()
                    },
                );
            })
            .unwrap();
    }

    fn flow<'a>(dir: &'a Path, notifier: &'a RecordingNotifier) -> ResetFlow<'a> {
        ResetFlow::new(dir, notifier, PasswordHasher::new(4), "http://localhost:8501/")
    }

    #[tokio::test]
    async fn test_request_and_redeem_once() {
        let dir = TempDir::new().unwrap();
        seed(dir.path());
        let notifier = RecordingNotifier::default();
        let flow = flow(dir.path(), &notifier);
        let now = Utc::now();

        let token = flow.request("ana", now).await.unwrap().unwrap();
        assert_eq!(token.email, "ana@ing.unrc.edu.ar");
        assert_eq!(token.expiry, now + Duration::minutes(15));
        assert!(token.token.len() >= 43);

        let sent = notifier.sent.lock();
        assert_eq!(sent.len(), 1);
        assert!(sent[0]
            .2
            .contains(&format!("http://localhost:8501/?token={}", token.token)));
        drop(sent);

        let username = flow.redeem(&token.token, "nueva", "nueva", now).unwrap();
        assert_eq!(username, "ana");
        let stored = SiteConfigStore::new(dir.path()).load();
        assert!(bcrypt::verify("nueva", &stored.credential("ana").unwrap().password).unwrap());

        // second use is rejected
        assert!(matches!(
            flow.redeem(&token.token, "otra", "otra", now),
            Err(AuthError::InvalidToken)
        ));
        assert!(ResetTokenStore::new(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_expired_token_rejected_and_purged() {
        let dir = TempDir::new().unwrap();
        seed(dir.path());
        let notifier = RecordingNotifier::default();
        let flow = flow(dir.path(), &notifier);
        let now = Utc::now();

        let token = flow.request("ana", now).await.unwrap().unwrap();
        let later = token.expiry + Duration::seconds(1);

        assert!(matches!(
            flow.redeem(&token.token, "nueva", "nueva", later),
            Err(AuthError::InvalidToken)
        ));
        assert!(ResetTokenStore::new(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_mismatched_confirmation_keeps_token() {
        let dir = TempDir::new().unwrap();
        seed(dir.path());
        let notifier = RecordingNotifier::default();
        let flow = flow(dir.path(), &notifier);
        let now = Utc::now();

        let token = flow.request("ana", now).await.unwrap().unwrap();
        assert!(matches!(
            flow.redeem(&token.token, "a", "b", now),
            Err(AuthError::InvalidPassword(_))
        ));
        assert!(flow.redeem(&token.token, "a", "a", now).is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_redeem_sets_password_once() {
        let dir = TempDir::new().unwrap();
        seed(dir.path());
        let notifier = RecordingNotifier::default();
        let now = Utc::now();
        let token = flow(dir.path(), &notifier)
            .request("ana", now)
            .await
            .unwrap()
            .unwrap();

        let barrier = std::sync::Barrier::new(2);
        let results: Vec<bool> = std::thread::scope(|scope| {
            let handles: Vec<_> = ["primera", "segunda"]
                .into_iter()
                .map(|password| {
                    let (barrier, notifier, token) = (&barrier, &notifier, &token.token);
                    let dir = dir.path();
                    scope.spawn(move || {
                        let flow = flow(dir, notifier);
                        barrier.wait();
                        flow.redeem(token, password, password, now).is_ok()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|ok| **ok).count(), 1);
        assert!(ResetTokenStore::new(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_user_consumes_token() {
        let dir = TempDir::new().unwrap();
        let notifier = RecordingNotifier::default();
        let flow = flow(dir.path(), &notifier);
        let now = Utc::now();

        ResetTokenStore::new(dir.path())
            .insert(
                &ResetToken {
                    token: "huerfano".to_string(),
                    username: "borrado".to_string(),
                    email: "borrado@x.org".to_string(),
                    expiry: now + Duration::minutes(15),
                },
                now,
            )
            .unwrap();

        assert!(matches!(
            flow.redeem("huerfano", "nueva", "nueva", now),
            Err(AuthError::UnknownUser(_))
        ));
        assert!(ResetTokenStore::new(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_profile_email_fallback() {
        let dir = TempDir::new().unwrap();
        let mut profile = UserProfile::new("Luis", "luis@x.org", false);
        profile.alert_email = None;
        UserStore::new(dir.path()).upsert(profile).unwrap();
        let notifier = RecordingNotifier::default();
        let flow = flow(dir.path(), &notifier);

        let token = flow.request("luis@x.org", Utc::now()).await.unwrap().unwrap();
        assert_eq!(token.email, "luis@x.org");
        assert_eq!(notifier.sent.lock()[0].0, "luis@x.org");
    }

    #[tokio::test]
    async fn test_unknown_user_sends_nothing() {
        let dir = TempDir::new().unwrap();
        let notifier = RecordingNotifier::default();
        let flow = flow(dir.path(), &notifier);

        assert!(flow.request("nadie", Utc::now()).await.unwrap().is_none());
        assert!(notifier.sent.lock().is_empty());
        assert!(ResetTokenStore::new(dir.path()).is_empty());
    }
}

//! bcrypt password hashing

use super::AuthError;

pub const DEFAULT_BCRYPT_COST: u32 = 12;

/// Lowest cost bcrypt accepts
pub const MIN_COST: u32 = 4;
/// Highest cost bcrypt accepts
pub const MAX_COST: u32 = 31;

#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_BCRYPT_COST)
    }
}

impl PasswordHasher {
    /// Cost is clamped to the range bcrypt accepts
    pub fn new(cost: u32) -> Self {
        Self {
            cost: cost.clamp(MIN_COST, MAX_COST),
        }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    pub fn hash(&self, plain: &str) -> Result<String, AuthError> {
        Ok(bcrypt::hash(plain, self.cost)?)
    }

    /// A malformed stored hash never verifies
    pub fn verify(&self, plain: &str, hashed: &str) -> bool {
        match bcrypt::verify(plain, hashed) {
            Ok(ok) => ok,
            Err(e) => {
                tracing::warn!(error = %e, "Stored password hash is not valid bcrypt");
                false
            }
        }
    }
}

/// Checks shared by registration, reset and password change
pub fn validate_new_password(new: &str, confirm: &str) -> Result<(), AuthError> {
    if new.is_empty() || confirm.is_empty() {
        return Err(AuthError::InvalidPassword(
            "New password and confirmation are required".to_string(),
        ));
    }
    if new != confirm {
        return Err(AuthError::InvalidPassword(
            "New password and confirmation do not match".to_string(),
        ));
    }
    Ok(())
}

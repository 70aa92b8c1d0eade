//! Form checks that run before anything touches the network.

use thiserror::Error;

use crate::api::types::{GenerateRequest, Genre, LoginRequest, RegisterRequest, Voice};

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Email and password are required")]
    MissingCredentials,
    #[error("Username is required")]
    MissingUsername,
    #[error("Please enter a valid email")]
    InvalidEmail,
    #[error("Password must be at least 8 characters")]
    PasswordTooShort,
    #[error("Please enter a text prompt")]
    MissingPrompt,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

impl LoginForm {
    pub fn validate(&self) -> Result<LoginRequest, ValidationError> {
        if self.email.is_empty() || self.password.is_empty() {
            return Err(ValidationError::MissingCredentials);
        }
        Ok(LoginRequest {
            email: self.email.clone(),
            password: self.password.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegisterForm {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl RegisterForm {
    pub fn validate(&self) -> Result<RegisterRequest, ValidationError> {
        if self.username.trim().is_empty() {
            return Err(ValidationError::MissingUsername);
        }
        if !is_valid_email(&self.email) {
            return Err(ValidationError::InvalidEmail);
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ValidationError::PasswordTooShort);
        }
        Ok(RegisterRequest {
            username: self.username.clone(),
            email: self.email.clone(),
            password: self.password.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateForm {
    pub prompt: String,
    pub genre: Genre,
    pub voice: Voice,
}

impl GenerateForm {
    pub fn validate(&self) -> Result<GenerateRequest, ValidationError> {
        if self.prompt.trim().is_empty() {
            return Err(ValidationError::MissingPrompt);
        }
        Ok(GenerateRequest {
            prompt: self.prompt.clone(),
            genre: self.genre,
            voice: self.voice,
        })
    }
}

/// `local@domain.tld` with no whitespace and exactly one `@`.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    // some dot must have text on both sides
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

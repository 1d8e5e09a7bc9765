use std::sync::OnceLock;

use regex::Regex;

use shared_models::auth::Role;

use crate::models::RegisterRequest;

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}$").expect("valid email regex")
    })
}

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\+?[1-9]\d{7,14}$").expect("valid phone regex"))
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Keep digits and `+` only: "+1 (555) 010-2000" becomes "+15550102000".
pub fn normalize_phone(phone: &str) -> String {
    phone
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect()
}

pub fn validate_name(name: &str, issues: &mut Vec<String>) {
    if name.trim().chars().count() < 3 {
        issues.push("Name must be at least 3 characters".to_string());
    }
}

pub fn validate_phone(phone: &str, issues: &mut Vec<String>) {
    if !phone_pattern().is_match(phone) {
        issues.push("Invalid phone number format".to_string());
    }
}

/// Normalized registration input, ready to insert.
#[derive(Debug, Clone)]
pub struct ValidRegistration {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub role: Role,
    pub specialty: Option<String>,
}

pub fn validate_registration(request: &RegisterRequest) -> Result<ValidRegistration, Vec<String>> {
    let mut issues = Vec::new();

    let name = request.name.trim().to_string();
    let email = normalize_email(&request.email);
    let phone = normalize_phone(&request.phone);
    let specialty = match request.role {
        Role::Doctor => request
            .specialty
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        Role::Patient => None,
    };

    validate_name(&name, &mut issues);
    if !email_pattern().is_match(&email) {
        issues.push("Invalid email format".to_string());
    }
    validate_phone(&phone, &mut issues);

    let password = &request.password;
    if password.chars().count() < 8
        || !password.chars().any(|c| c.is_ascii_digit())
        || !password.chars().any(|c| c.is_ascii_alphabetic())
    {
        issues.push("Password must be 8+ characters with letters and numbers".to_string());
    }
    if request.password != request.password_confirm {
        issues.push("Passwords do not match".to_string());
    }
    if request.role == Role::Doctor && specialty.is_none() {
        issues.push("Specialty is required for doctors".to_string());
    }

    if !issues.is_empty() {
        return Err(issues);
    }

    Ok(ValidRegistration {
        name,
        email,
        phone,
        role: request.role,
        specialty,
    })
}

use serde_json::{Map, Value};

use super::{strip_identity, ResourceSchema, Rules, SchemaError};
use crate::database::CollectionSpec;
use crate::filter::FilterWhereInfo;

pub const USERS: &str = "users";

pub const ROLES: &[&str] = &["user", "guide", "lead-guide", "admin"];

/// Never rendered, including when a user is populated into another document.
pub const HIDDEN: &[&str] = &[
    "password",
    "passwordConfirm",
    "active",
    "passwordChangedAt",
    "passwordResetToken",
    "passwordResetExpires",
];

const FIELDS: &[&str] = &[
    "name",
    "email",
    "photo",
    "role",
    "password",
    "passwordChangedAt",
    "passwordResetToken",
    "passwordResetExpires",
    "active",
];

pub const MIN_PASSWORD_LENGTH: usize = 8;

pub struct UserSchema;

impl UserSchema {
    /// Rules for a password chosen by the user, checked before hashing.
    pub fn check_new_password(password: Option<&Value>, confirm: Option<&Value>) -> Result<(), SchemaError> {
        let mut errors = super::FieldErrors::new();
        match password.and_then(Value::as_str) {
            None | Some("") => {
                errors.insert("password".into(), "Please provide a password".into());
            }
            Some(p) if p.chars().count() < MIN_PASSWORD_LENGTH => {
                errors.insert("password".into(), "Password must have at least 8 characters".into());
            }
            Some(_) => {}
        }
        match confirm.and_then(Value::as_str) {
            None | Some("") => {
                errors.insert("passwordConfirm".into(), "Please confirm your password".into());
            }
            Some(c) if password.and_then(Value::as_str) != Some(c) => {
                errors.insert("passwordConfirm".into(), "Passwords are not the same".into());
            }
            Some(_) => {}
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::Invalid(errors))
        }
    }
}

impl ResourceSchema for UserSchema {
    fn collection(&self) -> CollectionSpec {
        CollectionSpec { name: USERS, unique_keys: &[&["name"], &["email"]] }
    }

    fn normalize(&self, data: Map<String, Value>) -> Result<Map<String, Value>, SchemaError> {
        let mut rules = Rules::new(data).known(FIELDS);
        rules
            .string("name", true)
            .required("name", "Please tell us your name")
            .length(
                "name",
                5,
                20,
                "A name must have at least 5 characters",
                "A name can have at most 20 characters",
            )
            .string("email", true)
            .required("email", "Please provide your email")
            .default("photo", "default.jpg")
            .string("photo", false)
            .default("role", "user")
            .one_of("role", ROLES, "Role is either: user, guide, lead-guide, admin")
            .string("password", false)
            .required("password", "Please provide a password")
            .timestamp("passwordChangedAt")
            .string("passwordResetToken", false)
            .timestamp("passwordResetExpires")
            .default("active", true)
            .boolean("active");

        if let Some(email) = rules.get("email").and_then(Value::as_str).map(str::to_lowercase) {
            if is_valid_email(&email) {
                rules.set("email", email);
            } else {
                rules.fail("email", "Please provide a valid email");
            }
        }

        rules.finish()
    }

    /// Checks the chosen password and drops the confirmation. The password is
    /// still plain text afterwards; callers hash it before storing.
    fn validate_create(&self, body: Map<String, Value>) -> Result<Map<String, Value>, SchemaError> {
        let mut body = strip_identity(body);
        Self::check_new_password(body.get("password"), body.get("passwordConfirm"))?;
        body.remove("passwordConfirm");
        self.normalize(body)
    }

    fn validate_update(
        &self,
        existing: &Map<String, Value>,
        patch: Map<String, Value>,
    ) -> Result<Map<String, Value>, SchemaError> {
        if patch.contains_key("password") || patch.contains_key("passwordConfirm") {
            return Err(SchemaError::Rejected(
                "This route is not for password updates. Please use /updateMyPassword".to_string(),
            ));
        }
        let mut merged = existing.clone();
        for (k, v) in strip_identity(patch) {
            merged.insert(k, v);
        }
        self.normalize(merged)
    }

    fn hidden_fields(&self) -> &'static [&'static str] {
        HIDDEN
    }

    fn default_scope(&self) -> Vec<FilterWhereInfo> {
        vec![FilterWhereInfo::ne("active", false)]
    }
}

pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && domain.split('.').all(|label| !label.is_empty())
}

use crate::models::User;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use uuid::Uuid;
use validator::{Validate, ValidateEmail, ValidationError, ValidationErrors};

// DTOs (Data Transfer Objects) define the structure of data exchanged with clients.
// Read models below are what the templates render; forms are what they submit.

// ============================================================================
// Read models
// ============================================================================

/// Post joined with its author, category, location and comment count
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PostDto {
    pub id: i64,
    pub title: String,
    pub text: String,
    pub image: Option<String>,
    pub pub_date: DateTime<Utc>,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
    pub author_id: Uuid,
    pub author_username: String,
    pub category_id: Option<i64>,
    pub category_title: Option<String>,
    pub category_slug: Option<String>,
    pub category_is_published: Option<bool>,
    pub location_id: Option<i64>,
    pub location_name: Option<String>,
    pub location_is_published: Option<bool>,
    pub comment_count: i64,
}

impl PostDto {
    /// Publication gate: published, not scheduled for later, and filed under a
    /// published category
    pub fn is_public(&self, now: DateTime<Utc>) -> bool {
        self.is_published && self.pub_date <= now && self.category_is_published == Some(true)
    }

    /// Authors always see their own posts; everyone else only sees public ones
    pub fn is_visible_to(&self, viewer: Option<&User>, now: DateTime<Utc>) -> bool {
        self.is_public(now) || viewer.is_some_and(|user| user.id == self.author_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CommentDto {
    pub id: i64,
    pub text: String,
    pub post_id: i64,
    pub author_id: Uuid,
    pub author_username: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Query DTOs
// ============================================================================

/// `?page=` is kept as raw text; the paginator decides what junk means
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NextQuery {
    pub next: Option<String>,
}

// ============================================================================
// Form plumbing
// ============================================================================

/// Field name → messages, as rendered by `includes/form_errors.html`.
/// Errors that belong to no single field go under `__all__`.
pub type FormErrors = BTreeMap<String, Vec<String>>;

pub const NON_FIELD_ERRORS: &str = "__all__";

pub fn form_errors(errors: &ValidationErrors) -> FormErrors {
    errors
        .field_errors()
        .into_iter()
        .map(|(field, errors)| {
            let messages = errors
                .iter()
                .map(|e| match &e.message {
                    Some(message) => message.to_string(),
                    None => e.code.to_string(),
                })
                .collect();
            (field.to_string(), messages)
        })
        .collect()
}

pub fn add_error(errors: &mut FormErrors, field: &str, message: impl Into<String>) {
    errors
        .entry(field.to_string())
        .or_default()
        .push(message.into());
}

/// Forms that carry the `csrfmiddlewaretoken` hidden field
pub trait CsrfProtected {
    fn csrf_token(&self) -> &str;
}

fn error(code: &'static str, message: &'static str) -> ValidationError {
    ValidationError::new(code).with_message(Cow::Borrowed(message))
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(error("required", "This field is required."));
    }
    Ok(())
}

fn validate_username(value: &str) -> Result<(), ValidationError> {
    not_blank(value)?;
    if value.chars().count() > 150 {
        return Err(error(
            "max_length",
            "Ensure this value has at most 150 characters.",
        ));
    }
    let allowed = |c: char| c.is_alphanumeric() || "@.+-_".contains(c);
    if !value.chars().all(allowed) {
        return Err(error(
            "invalid",
            "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
        ));
    }
    Ok(())
}

/// Email is optional, but when present it must look like one
fn validate_optional_email(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() || value.validate_email() {
        Ok(())
    } else {
        Err(error("invalid", "Enter a valid email address."))
    }
}

fn validate_datetime_local(value: &str) -> Result<(), ValidationError> {
    not_blank(value)?;
    parse_datetime_local(value)
        .map(|_| ())
        .ok_or_else(|| error("invalid", "Enter a valid date/time."))
}

/// Parse the value of an `<input type="datetime-local">`; the result is taken as UTC
pub fn parse_datetime_local(value: &str) -> Option<DateTime<Utc>> {
    const FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%d %H:%M:%S",
    ];
    let value = value.trim();
    FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

pub fn format_datetime_local(value: DateTime<Utc>) -> String {
    value.format("%Y-%m-%dT%H:%M").to_string()
}

// ============================================================================
// Comment form
// ============================================================================

#[derive(Validate, Debug, Default, Clone, Serialize, Deserialize)]
pub struct CommentForm {
    #[validate(custom(function = "not_blank"))]
    #[serde(default)]
    pub text: String,

    #[serde(default, skip_serializing)]
    pub csrfmiddlewaretoken: String,
}

impl CsrfProtected for CommentForm {
    fn csrf_token(&self) -> &str {
        &self.csrfmiddlewaretoken
    }
}

/// Forms whose only field is the CSRF token (delete confirmations, logout)
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ConfirmForm {
    #[serde(default)]
    pub csrfmiddlewaretoken: String,
}

impl CsrfProtected for ConfirmForm {
    fn csrf_token(&self) -> &str {
        &self.csrfmiddlewaretoken
    }
}

// ============================================================================
// Post form
// ============================================================================

/// An uploaded file as read from a multipart body
#[derive(Debug, Clone, Default)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Post create/edit submission, bound from `multipart/form-data`
#[derive(Validate, Debug, Default, Clone)]
pub struct PostForm {
    #[validate(
        custom(function = "not_blank"),
        length(max = 256, message = "Ensure this value has at most 256 characters.")
    )]
    pub title: String,

    #[validate(custom(function = "not_blank"))]
    pub text: String,

    #[validate(custom(function = "validate_datetime_local"))]
    pub pub_date: String,

    pub is_published: bool,
    /// Raw `<select>` values; resolved against the known rows by the handler
    pub category: Option<String>,
    pub location: Option<String>,
    pub image: Option<UploadedFile>,
    pub image_clear: bool,
    pub csrfmiddlewaretoken: String,
}

impl CsrfProtected for PostForm {
    fn csrf_token(&self) -> &str {
        &self.csrfmiddlewaretoken
    }
}

impl PostForm {
    /// Values to re-fill the form with; `current_image` is the stored image on edit
    pub fn values(&self, current_image: Option<String>) -> PostFormValues {
        PostFormValues {
            title: self.title.clone(),
            text: self.text.clone(),
            pub_date: self.pub_date.clone(),
            is_published: self.is_published,
            category: self.category.as_deref().and_then(|id| id.trim().parse().ok()),
            location: self.location.as_deref().and_then(|id| id.trim().parse().ok()),
            image: current_image,
        }
    }
}

/// What `blog/create.html` renders into the inputs
#[derive(Debug, Clone, Serialize)]
pub struct PostFormValues {
    pub title: String,
    pub text: String,
    pub pub_date: String,
    pub is_published: bool,
    pub category: Option<i64>,
    pub location: Option<i64>,
    pub image: Option<String>,
}

impl PostFormValues {
    pub fn blank(now: DateTime<Utc>) -> Self {
        PostFormValues {
            title: String::new(),
            text: String::new(),
            pub_date: format_datetime_local(now),
            is_published: true,
            category: None,
            location: None,
            image: None,
        }
    }

    pub fn from_post(post: &PostDto) -> Self {
        PostFormValues {
            title: post.title.clone(),
            text: post.text.clone(),
            pub_date: format_datetime_local(post.pub_date),
            is_published: post.is_published,
            category: post.category_id,
            location: post.location_id,
            image: post.image.clone(),
        }
    }
}

/// Validated post fields ready for the database
#[derive(Debug, Clone)]
pub struct PostInput {
    pub title: String,
    pub text: String,
    pub pub_date: DateTime<Utc>,
    pub is_published: bool,
    pub category_id: Option<i64>,
    pub location_id: Option<i64>,
    pub image: Option<String>,
}

// ============================================================================
// Authentication DTOs
// ============================================================================

#[derive(Validate, Debug, Default, Clone, Serialize, Deserialize)]
pub struct RegisterUserDto {
    #[validate(custom(function = "validate_username"))]
    #[serde(default)]
    pub username: String,

    #[validate(length(max = 150, message = "Ensure this value has at most 150 characters."))]
    #[serde(default)]
    pub first_name: String,

    #[validate(length(max = 150, message = "Ensure this value has at most 150 characters."))]
    #[serde(default)]
    pub last_name: String,

    #[validate(custom(function = "validate_optional_email"))]
    #[serde(default)]
    pub email: String,

    #[validate(length(
        min = 8,
        max = 64,
        message = "Password must be between 8 and 64 characters."
    ))]
    #[serde(default, skip_serializing)]
    pub password1: String,

    #[validate(must_match(other = "password1", message = "The two password fields didn’t match."))]
    #[serde(default, skip_serializing)]
    pub password2: String,

    #[serde(default, skip_serializing)]
    pub csrfmiddlewaretoken: String,
}

impl CsrfProtected for RegisterUserDto {
    fn csrf_token(&self) -> &str {
        &self.csrfmiddlewaretoken
    }
}

#[derive(Validate, Debug, Default, Clone, Serialize, Deserialize)]
pub struct LoginUserDto {
    #[validate(custom(function = "not_blank"))]
    #[serde(default)]
    pub username: String,

    #[validate(length(min = 1, message = "This field is required."))]
    #[serde(default, skip_serializing)]
    pub password: String,

    #[serde(default)]
    pub next: Option<String>,

    #[serde(default, skip_serializing)]
    pub csrfmiddlewaretoken: String,
}

impl CsrfProtected for LoginUserDto {
    fn csrf_token(&self) -> &str {
        &self.csrfmiddlewaretoken
    }
}

/// Password change request (requires old password verification)
#[derive(Validate, Debug, Default, Clone, Deserialize)]
pub struct PasswordChangeDto {
    #[validate(length(min = 1, message = "This field is required."))]
    #[serde(default)]
    pub old_password: String,

    #[validate(length(
        min = 8,
        max = 64,
        message = "Password must be between 8 and 64 characters."
    ))]
    #[serde(default)]
    pub new_password1: String,

    #[validate(must_match(
        other = "new_password1",
        message = "The two password fields didn’t match."
    ))]
    #[serde(default)]
    pub new_password2: String,

    #[serde(default)]
    pub csrfmiddlewaretoken: String,
}

impl CsrfProtected for PasswordChangeDto {
    fn csrf_token(&self) -> &str {
        &self.csrfmiddlewaretoken
    }
}

// ============================================================================
// User Update DTOs
// ============================================================================

#[derive(Validate, Debug, Default, Clone, Serialize, Deserialize)]
pub struct UserEditDto {
    #[validate(length(max = 150, message = "Ensure this value has at most 150 characters."))]
    #[serde(default)]
    pub first_name: String,

    #[validate(length(max = 150, message = "Ensure this value has at most 150 characters."))]
    #[serde(default)]
    pub last_name: String,

    #[validate(custom(function = "validate_username"))]
    #[serde(default)]
    pub username: String,

    #[validate(custom(function = "validate_optional_email"))]
    #[serde(default)]
    pub email: String,

    #[serde(default, skip_serializing)]
    pub csrfmiddlewaretoken: String,
}

impl CsrfProtected for UserEditDto {
    fn csrf_token(&self) -> &str {
        &self.csrfmiddlewaretoken
    }
}

impl UserEditDto {
    pub fn from_user(user: &User) -> Self {
        UserEditDto {
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            csrfmiddlewaretoken: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn post(is_published: bool, offset_minutes: i64, category: Option<bool>) -> PostDto {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        PostDto {
            id: 1,
            title: "t".into(),
            text: "x".into(),
            image: None,
            pub_date: now + Duration::minutes(offset_minutes),
            is_published,
            created_at: now,
            author_id: Uuid::nil(),
            author_username: "author".into(),
            category_id: category.map(|_| 1),
            category_title: category.map(|_| "c".into()),
            category_slug: category.map(|_| "c".into()),
            category_is_published: category,
            location_id: None,
            location_name: None,
            location_is_published: None,
            comment_count: 0,
        }
    }

    fn user(id: Uuid) -> User {
        let now = Utc::now();
        User {
            id,
            username: "u".into(),
            first_name: String::new(),
            last_name: String::new(),
            email: String::new(),
            password: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn publication_gate_requires_all_three_conditions() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert!(post(true, -1, Some(true)).is_public(now));
        assert!(post(true, 0, Some(true)).is_public(now));
        assert!(!post(false, -1, Some(true)).is_public(now));
        assert!(!post(true, 1, Some(true)).is_public(now));
        assert!(!post(true, -1, Some(false)).is_public(now));
        assert!(!post(true, -1, None).is_public(now));
    }

    #[test]
    fn author_sees_hidden_post_others_do_not() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let hidden = post(false, 60, Some(false));

        assert!(hidden.is_visible_to(Some(&user(Uuid::nil())), now));
        assert!(!hidden.is_visible_to(Some(&user(Uuid::new_v4())), now));
        assert!(!hidden.is_visible_to(None, now));
    }

    #[test]
    fn registration_requires_matching_passwords() {
        let dto = RegisterUserDto {
            username: "reader".into(),
            password1: "long enough".into(),
            password2: "different!".into(),
            ..Default::default()
        };
        let errors = form_errors(&dto.validate().unwrap_err());
        assert!(errors.contains_key("password2"));
        assert!(!errors.contains_key("username"));
    }

    #[test]
    fn username_charset_is_enforced() {
        let dto = UserEditDto {
            username: "no spaces".into(),
            ..Default::default()
        };
        let errors = form_errors(&dto.validate().unwrap_err());
        assert_eq!(errors["username"].len(), 1);

        let dto = UserEditDto {
            username: "a.b+c-d_e@f".into(),
            email: "a@example.com".into(),
            ..Default::default()
        };
        assert!(dto.validate().is_ok());
    }

    #[test]
    fn blank_email_is_allowed_but_bad_email_is_not() {
        let mut dto = UserEditDto {
            username: "reader".into(),
            ..Default::default()
        };
        assert!(dto.validate().is_ok());

        dto.email = "not-an-email".into();
        assert!(form_errors(&dto.validate().unwrap_err()).contains_key("email"));
    }

    #[test]
    fn post_form_checks_title_text_and_date() {
        let form = PostForm {
            title: "   ".into(),
            text: String::new(),
            pub_date: "yesterday".into(),
            ..Default::default()
        };
        let errors = form_errors(&form.validate().unwrap_err());
        assert!(errors.contains_key("title"));
        assert!(errors.contains_key("text"));
        assert!(errors.contains_key("pub_date"));
    }

    #[test]
    fn datetime_local_parsing() {
        let parsed = parse_datetime_local("2024-05-01T09:30").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap());
        assert_eq!(format_datetime_local(parsed), "2024-05-01T09:30");
        assert!(parse_datetime_local("2024-05-01T09:30:15").is_some());
        assert!(parse_datetime_local("01.05.2024").is_none());
    }

    #[test]
    fn add_error_appends_to_field() {
        let mut errors = FormErrors::new();
        add_error(&mut errors, NON_FIELD_ERRORS, "first");
        add_error(&mut errors, NON_FIELD_ERRORS, "second");
        assert_eq!(errors[NON_FIELD_ERRORS], vec!["first", "second"]);
    }
}

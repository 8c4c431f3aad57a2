//! Input rules for the registration, upload and catalog forms.

use std::path::Path;

use rocket::http::ContentType;

use crate::error::MarketError;

pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 30;
pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_TITLE_LEN: usize = 255;
pub const MAX_DESCRIPTION_LEN: usize = 5000;
pub const MAX_TAG_NAME_LEN: usize = 30;
pub const MAX_QUERY_PARAM_LEN: usize = 100;

pub const MAX_IMAGE_SIZE: u64 = 10 * 1024 * 1024;
pub const MAX_PRODUCT_FILE_SIZE: u64 = 100 * 1024 * 1024;
pub const MAX_PRODUCT_FILES: usize = 10;

pub const PRODUCT_FILE_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "txt", "rtf", "zip", "rar", "jpg", "jpeg", "png", "gif", "mp3", "mp4",
    "avi", "mov", "psd", "ai", "eps", "svg",
];

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

fn invalid(msg: impl Into<String>) -> MarketError {
    MarketError::Validation(msg.into())
}

pub fn validate_email(email: &str) -> Result<(), MarketError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(invalid("Email cannot be empty"));
    }

    let (local, domain) = email
        .split_once('@')
        .ok_or_else(|| invalid("Invalid email format"))?;

    let local_ok = !local.is_empty()
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._%+-".contains(c));
    let domain_ok = domain
        .rsplit_once('.')
        .map(|(host, tld)| {
            !host.is_empty()
                && host
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
                && tld.len() >= 2
                && tld.chars().all(|c| c.is_ascii_alphabetic())
        })
        .unwrap_or(false);

    if local_ok && domain_ok {
        Ok(())
    } else {
        Err(invalid("Invalid email format"))
    }
}

pub fn validate_username(username: &str) -> Result<(), MarketError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(invalid("Username cannot be empty"));
    }
    if username.len() < MIN_USERNAME_LEN || username.len() > MAX_USERNAME_LEN {
        return Err(invalid(format!(
            "Username must be between {} and {} characters",
            MIN_USERNAME_LEN, MAX_USERNAME_LEN
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(invalid(
            "Username may only contain latin letters, digits and underscores",
        ));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), MarketError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(invalid(format!(
            "Password must be at least {} characters long",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

pub fn validate_title(title: &str) -> Result<(), MarketError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(invalid("Title cannot be empty"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(invalid(format!(
            "Title is too long (at most {} characters)",
            MAX_TITLE_LEN
        )));
    }
    Ok(())
}

pub fn validate_description(description: &str) -> Result<(), MarketError> {
    if description.trim().chars().count() > MAX_DESCRIPTION_LEN {
        return Err(invalid(format!(
            "Description is too long (at most {} characters)",
            MAX_DESCRIPTION_LEN
        )));
    }
    Ok(())
}

pub fn validate_tag_name(name: &str) -> Result<(), MarketError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(invalid("Tag name cannot be empty"));
    }
    if name.chars().count() > MAX_TAG_NAME_LEN {
        return Err(invalid(format!(
            "Tag name is too long (at most {} characters)",
            MAX_TAG_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || c == '-')
    {
        return Err(invalid(
            "Tag names may only contain letters, digits, spaces and hyphens",
        ));
    }
    Ok(())
}

/// Trims and caps a raw query parameter.
pub fn sanitize_query_param(param: &str) -> String {
    param.trim().chars().take(MAX_QUERY_PARAM_LEN).collect()
}

pub fn validate_query_param(param: &str) -> Result<(), MarketError> {
    let param = param.trim();
    if param.is_empty()
        || param
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || c == '_' || c == '-')
    {
        Ok(())
    } else {
        Err(invalid("Query parameter contains forbidden characters"))
    }
}

/// Splits a `tags=a,b` filter into the valid tag names it contains, dropping
/// blanks, invalid names and case-insensitive duplicates.
///
/// `None` means no filter was asked for. `Some` with an empty list means a
/// filter was given but none of its names are usable, which matches nothing.
pub fn tag_filter(raw: &str) -> Result<Option<Vec<String>>, MarketError> {
    let tags = sanitize_query_param(raw);
    if tags.is_empty() {
        return Ok(None);
    }
    if !tags.split(',').all(|t| validate_query_param(t).is_ok()) {
        return Err(invalid("Invalid format for the tags parameter"));
    }

    let mut names: Vec<String> = Vec::new();
    for name in tags.split(',').map(str::trim) {
        if validate_tag_name(name).is_err() {
            continue;
        }
        if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            names.push(name.to_string());
        }
    }
    Ok(Some(names))
}

pub fn validate_image(content_type: Option<&ContentType>, size: u64) -> Result<(), MarketError> {
    if size == 0 {
        return Err(invalid("Product image is missing"));
    }
    if size > MAX_IMAGE_SIZE {
        return Err(invalid(format!(
            "Image is too large (at most {} MB)",
            MAX_IMAGE_SIZE / (1024 * 1024)
        )));
    }

    let allowed = content_type
        .map(|ct| ct.is_jpeg() || ct.is_png() || ct.is_gif() || ct.is_webp())
        .unwrap_or(false);
    if !allowed {
        return Err(invalid("Image must be a JPEG, PNG, GIF or WebP file"));
    }
    Ok(())
}

pub fn validate_product_file(file_name: &str, size: u64) -> Result<(), MarketError> {
    if size > MAX_PRODUCT_FILE_SIZE {
        return Err(invalid(format!(
            "File is too large (at most {} MB)",
            MAX_PRODUCT_FILE_SIZE / (1024 * 1024)
        )));
    }

    let extension = extension_of(file_name).ok_or_else(|| invalid("File must have an extension"))?;
    if !PRODUCT_FILE_EXTENSIONS.contains(&extension.as_str()) {
        return Err(invalid("File type is not allowed"));
    }
    Ok(())
}

pub fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_ascii_lowercase())
}

pub fn is_image_file(file_name: &str) -> bool {
    extension_of(file_name)
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Keeps only the base name and replaces anything but letters, digits, `.`,
/// `-` and `_` with `_`.
pub fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();

    let safe: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if safe.is_empty() || safe.chars().all(|c| c == '.') {
        "file".to_string()
    } else {
        safe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails() {
        assert!(validate_email("buyer@example.com").is_ok());
        assert!(validate_email(" first.last+tag@mail.example.org ").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("no-at-sign.example.com").is_err());
        assert!(validate_email("user@localhost").is_err());
        assert!(validate_email("user@example.c").is_err());
        assert!(validate_email("us er@example.com").is_err());
    }

    #[test]
    fn usernames() {
        assert!(validate_username("alice_01").is_ok());
        assert!(validate_username("al").is_err());
        assert!(validate_username(&"a".repeat(31)).is_err());
        assert!(validate_username("bob smith").is_err());
        assert!(validate_username("   ").is_err());
    }

    #[test]
    fn passwords() {
        assert!(validate_password("secret").is_ok());
        assert!(validate_password("short").is_err());
    }

    #[test]
    fn titles_and_descriptions() {
        assert!(validate_title("Icon pack").is_ok());
        assert!(validate_title("  ").is_err());
        assert!(validate_title(&"x".repeat(256)).is_err());
        assert!(validate_description("").is_ok());
        assert!(validate_description(&"x".repeat(5001)).is_err());
    }

    #[test]
    fn tag_names() {
        assert!(validate_tag_name("sci-fi").is_ok());
        assert!(validate_tag_name("3d models").is_ok());
        assert!(validate_tag_name("").is_err());
        assert!(validate_tag_name("c++").is_err());
        assert!(validate_tag_name(&"t".repeat(31)).is_err());
    }

    #[test]
    fn tag_filter_skips_invalid_and_duplicate_names() {
        assert_eq!(
            tag_filter("music, Music ,,ambient").unwrap(),
            Some(vec!["music".to_string(), "ambient".to_string()])
        );
        assert!(tag_filter("a;drop").is_err());
    }

    #[test]
    fn blank_tag_filter_is_no_filter() {
        assert_eq!(tag_filter("").unwrap(), None);
        assert_eq!(tag_filter("   ").unwrap(), None);
    }

    #[test]
    fn tag_filter_without_usable_names_matches_nothing() {
        assert_eq!(tag_filter(",").unwrap(), Some(Vec::new()));
        assert_eq!(tag_filter(" , ,").unwrap(), Some(Vec::new()));
        assert_eq!(tag_filter(&"t".repeat(31)).unwrap(), Some(Vec::new()));
    }

    #[test]
    fn tag_filter_truncates_long_parameters() {
        let raw = format!("{},tail", "a".repeat(120));
        // The cap cuts the parameter before ",tail"; the lone long name is
        // not a valid tag, so nothing remains.
        assert_eq!(tag_filter(&raw).unwrap(), Some(Vec::new()));
    }

    #[test]
    fn product_files() {
        assert!(validate_product_file("book.PDF", 10).is_ok());
        assert!(validate_product_file("script.exe", 10).is_err());
        assert!(validate_product_file("README", 10).is_err());
        assert!(validate_product_file("movie.mp4", MAX_PRODUCT_FILE_SIZE + 1).is_err());
    }

    #[test]
    fn images() {
        assert!(validate_image(Some(&ContentType::PNG), 1024).is_ok());
        assert!(validate_image(Some(&ContentType::PDF), 1024).is_err());
        assert!(validate_image(None, 1024).is_err());
        assert!(validate_image(Some(&ContentType::JPEG), 0).is_err());
        assert!(validate_image(Some(&ContentType::JPEG), MAX_IMAGE_SIZE + 1).is_err());
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\docs\\my report.pdf"), "my_report.pdf");
        assert_eq!(sanitize_file_name("notes (v2).txt"), "notes__v2_.txt");
        assert_eq!(sanitize_file_name(".."), "file");
        assert_eq!(sanitize_file_name(""), "file");
    }

    #[test]
    fn image_detection() {
        assert!(is_image_file("cover.WEBP"));
        assert!(!is_image_file("bundle.zip"));
        assert!(!is_image_file("noext"));
    }
}

//! Input validation shared by the action handlers.

pub const MAX_MESSAGE_BODY_CHARS: usize = 1000;
pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Message bodies must be non-empty (after trimming) and at most
/// `MAX_MESSAGE_BODY_CHARS` characters.
pub fn validate_body(body: &str) -> Result<(), &'static str> {
    if body.trim().is_empty() {
        return Err("message body must not be empty");
    }
    if body.chars().count() > MAX_MESSAGE_BODY_CHARS {
        return Err("message body exceeds 1000 characters");
    }
    Ok(())
}

/// Pages are 1-based; zero and negative pages are rejected rather than
/// clamped so a broken client fails loudly.
pub fn validate_page(page: i64) -> Result<(), &'static str> {
    if page < 1 {
        return Err("page must be >= 1");
    }
    Ok(())
}

/// Hard-clamps the requested page size to `1..=MAX_PAGE_SIZE`.
#[must_use]
pub fn clamp_page_size(page_size: i64) -> i64 {
    page_size.clamp(1, MAX_PAGE_SIZE)
}

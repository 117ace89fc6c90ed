//! Shared pagination envelope returned by the Note and Comment stores.

/// A page of results plus enough metadata to render pagination controls.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub limit: i64,
    pub offset: i64,
}

/// Clamp a requested page size into the documented bounds (1..=100,
/// default 50).
#[must_use]
pub fn clamp_limit(limit: Option<i64>) -> i64 {
    match limit {
        None => 50,
        Some(l) if l < 1 => 1,
        Some(l) if l > 100 => 100,
        Some(l) => l,
    }
}

#[must_use]
pub fn clamp_offset(offset: Option<i64>) -> i64 {
    offset.filter(|o| *o >= 0).unwrap_or(0)
}

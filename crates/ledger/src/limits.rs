//! Fixed ledger limits and pagination rules.

/// Ceiling for a single transfer, in points.
pub const MAX_TRANSFER_AMOUNT: i64 = 100_000_000_000;

/// Maximum description length in bytes (UTF-8).
pub const MAX_DESCRIPTION_LENGTH: usize = 500;

/// Page size used when the caller passes a non-positive limit.
pub const DEFAULT_PAGE_LIMIT: i64 = 50;

/// Largest page size a caller can request.
pub const MAX_PAGE_LIMIT: i64 = 1000;

/// Normalize a `(limit, offset)` pair for journal listings.
///
/// `limit <= 0` becomes [`DEFAULT_PAGE_LIMIT`], anything above
/// [`MAX_PAGE_LIMIT`] is capped, and a negative offset becomes 0.
pub fn clamp_page(limit: i64, offset: i64) -> (i64, i64) {
    let limit = if limit <= 0 {
        DEFAULT_PAGE_LIMIT
    } else {
        limit.min(MAX_PAGE_LIMIT)
    };
    (limit, offset.max(0))
}

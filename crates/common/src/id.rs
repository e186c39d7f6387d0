//! ID and pickup code generation.

use rand::Rng;
use ulid::Ulid;

/// Prefix shared by every pickup code.
pub const PICKUP_CODE_PREFIX: &str = "SP";

/// ID generator for entities.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    _private: (),
}

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Generate a new ULID-based ID.
    ///
    /// ULIDs are:
    /// - Lexicographically sortable
    /// - Monotonically increasing within the same millisecond
    /// - Shorter than UUIDs when represented as strings
    #[must_use]
    pub fn generate(&self) -> String {
        Ulid::new().to_string().to_lowercase()
    }

    /// Generate a pickup code of the form `SP-####-#####`.
    ///
    /// Codes are random, not derived from the reservation ID, so they cannot
    /// be guessed from anything the customer can see. Uniqueness is enforced
    /// by the store; callers retry on collision.
    #[must_use]
    pub fn generate_pickup_code(&self) -> String {
        let mut rng = rand::thread_rng();
        let first: u32 = rng.gen_range(0..10_000);
        let second: u32 = rng.gen_range(0..100_000);
        format!("{PICKUP_CODE_PREFIX}-{first:04}-{second:05}")
    }
}

/// Normalize a scanned or typed pickup code.
///
/// Scanners add whitespace and staff type in lower case; both are ignored.
#[must_use]
pub fn normalize_pickup_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Whether `code` has the `SP-####-#####` shape.
#[must_use]
pub fn is_valid_pickup_code(code: &str) -> bool {
    let mut parts = code.split('-');
    let (Some(prefix), Some(first), Some(second), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };

    prefix == PICKUP_CODE_PREFIX
        && first.len() == 4
        && second.len() == 5
        && first.chars().chain(second.chars()).all(|c| c.is_ascii_digit())
}

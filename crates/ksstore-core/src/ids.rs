//! Record identifiers.
//!
//! Record ids are plain strings chosen by the caller. When the caller leaves
//! the id empty, a random UUID v4 is assigned.

/// Field under which every record carries its identifier.
pub const ID_FIELD: &str = "id";

/// Generate a new random record id (UUID v4, hyphenated).
#[must_use]
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Return `id` unchanged, or a freshly generated id if it is empty.
#[must_use]
pub fn resolve_id(id: &str) -> String {
    if id.is_empty() {
        generate_id()
    } else {
        id.to_string()
    }
}

//! Logical ID allocation.
//!
//! Every resource lives at a construct path such as
//! `["coco-annotator-vpc", "PublicSubnet1", "RouteTable"]`. Its template key is
//! the path's alphanumeric characters followed by eight hex digits of a hash
//! over the full path, so renaming a construct changes its ID while sibling
//! IDs stay stable across renders.

use sha2::{Digest, Sha256};

/// Path components that are dropped from the readable part of the ID.
const HIDDEN_COMPONENTS: &[&str] = &["Resource", "Default"];

/// Longest logical ID accepted by the provisioning engine.
const MAX_ID_LEN: usize = 255;

const HASH_LEN: usize = 8;

/// Allocate the logical ID for a construct path.
///
/// Single-component paths keep their readable name without a hash suffix.
pub fn allocate(path: &[&str]) -> String {
    if let [only] = path {
        let candidate = alphanumeric(only);
        if !candidate.is_empty() && candidate.len() <= MAX_ID_LEN {
            return candidate;
        }
    }

    let human: String = path
        .iter()
        .filter(|c| !HIDDEN_COMPONENTS.contains(*c))
        .map(|c| alphanumeric(c))
        .collect();
    let max_human = MAX_ID_LEN - HASH_LEN;
    let human = if human.len() > max_human {
        human[human.len() - max_human..].to_string()
    } else {
        human
    };

    format!("{}{}", human, path_hash(path))
}

/// Eight uppercase hex digits identifying the path.
pub fn path_hash(path: &[&str]) -> String {
    let digest = Sha256::digest(path.join("/").as_bytes());
    hex::encode_upper(digest)[..HASH_LEN].to_string()
}

fn alphanumeric(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_component_has_no_hash() {
        assert_eq!(allocate(&["Instance"]), "Instance");
        assert_eq!(allocate(&["coco-annotator-bucket"]), "cocoannotatorbucket");
    }

    #[test]
    fn test_resource_component_is_hidden_but_hashed() {
        let id = allocate(&["coco-annotator-bucket", "Resource"]);
        assert!(id.starts_with("cocoannotatorbucket"));
        assert_eq!(id.len(), "cocoannotatorbucket".len() + 8);
        assert_ne!(id, allocate(&["coco-annotator-bucket", "Other"]));
    }

    #[test]
    fn test_allocation_is_deterministic() {
        let a = allocate(&["Vpc", "PublicSubnet1", "RouteTable"]);
        let b = allocate(&["Vpc", "PublicSubnet1", "RouteTable"]);
        assert_eq!(a, b);
        assert!(a.starts_with("VpcPublicSubnet1RouteTable"));
    }

    #[test]
    fn test_hash_is_uppercase_hex() {
        let hash = path_hash(&["a", "b"]);
        assert_eq!(hash.len(), 8);
        assert!(hash.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_long_paths_are_truncated() {
        let long = "x".repeat(400);
        let id = allocate(&[&long, "Resource"]);
        assert_eq!(id.len(), MAX_ID_LEN);
    }
}

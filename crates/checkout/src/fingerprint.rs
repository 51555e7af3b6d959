//! Request fingerprinting for idempotent order creation.

use sha2::{Digest, Sha256};
use store::OrderLine;

/// Computes a deterministic fingerprint of an item list.
///
/// Lines are normalized by sorting on product id before hashing, so a
/// retried request carries the same fingerprint regardless of how the
/// client happened to order its items. The fingerprint is stored with the
/// idempotency record and compared on every reuse of the same key.
pub fn request_fingerprint(lines: &[OrderLine]) -> String {
    let mut normalized = lines.to_vec();
    normalized.sort_by_key(|line| line.product_id);

    let canonical = serde_json::json!({ "items": normalized });
    // Serializing plain structs into a Value cannot fail.
    let encoded = serde_json::to_vec(&canonical).unwrap_or_default();
    hex::encode(Sha256::digest(&encoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ProductId;

    fn line(product_id: ProductId, quantity: i32) -> OrderLine {
        OrderLine {
            product_id,
            quantity,
        }
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = ProductId::new();
        let b = ProductId::new();
        let lines = vec![line(a, 1), line(b, 3)];

        assert_eq!(request_fingerprint(&lines), request_fingerprint(&lines));
    }

    #[test]
    fn fingerprint_ignores_line_order() {
        let a = ProductId::new();
        let b = ProductId::new();

        let forward = request_fingerprint(&[line(a, 1), line(b, 3)]);
        let reversed = request_fingerprint(&[line(b, 3), line(a, 1)]);
        assert_eq!(forward, reversed);
    }

    #[test]
    fn fingerprint_changes_with_quantity() {
        let a = ProductId::new();

        assert_ne!(
            request_fingerprint(&[line(a, 1)]),
            request_fingerprint(&[line(a, 2)])
        );
    }

    #[test]
    fn fingerprint_changes_with_products() {
        let a = ProductId::new();
        let b = ProductId::new();

        assert_ne!(
            request_fingerprint(&[line(a, 1)]),
            request_fingerprint(&[line(b, 1)])
        );
    }
}

//! Checkout error types.

use common::ProductId;
use store::StoreError;
use thiserror::Error;

/// Errors that can occur during checkout operations.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The request contains no items.
    #[error("Order has no items")]
    NoItems,

    /// The same product appears more than once in the request.
    /// Duplicates are rejected, never merged.
    #[error("Duplicate product in order: {0}")]
    DuplicateProduct(ProductId),

    /// A requested quantity is not positive.
    #[error("Invalid quantity for product {product_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity {
        product_id: ProductId,
        quantity: i32,
    },

    /// An error occurred in the order store.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for checkout operations.
pub type Result<T> = std::result::Result<T, CheckoutError>;

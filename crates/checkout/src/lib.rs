//! Order creation and payment confirmation.
//!
//! [`OrderService`] validates requests and drives the idempotent,
//! all-or-nothing creation path; [`PaymentService`] advances an order to
//! paid while appending the `order.paid` outbox event in the same
//! transactional unit. Both are thin orchestrations over
//! [`store::OrderStore`], which owns the atomicity.

mod error;
mod fingerprint;
mod payment;
mod service;

pub use error::{CheckoutError, Result};
pub use fingerprint::request_fingerprint;
pub use payment::PaymentService;
pub use service::OrderService;

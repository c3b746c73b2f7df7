//! Payment gateway adapter: order creation, signature checks, method lookup.

pub mod error;
pub mod provider;
pub mod providers;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use provider::PaymentGateway;
pub use types::{CreateOrderRequest, GatewayOrder, GatewayRefund, PaymentMethod, WebhookEvent};

//! Services module for factory-service.

pub mod database;
pub mod gateway;
pub mod jwt;
pub mod memory_store;
pub mod metrics;
pub mod razorpay;
pub mod store;

pub use database::Database;
pub use gateway::{
    GatewayError, GatewayKind, PaymentGateway, PaymentGateways, RazorpayGateway, WebhookOutcome,
};
pub use jwt::{AccessTokenClaims, JwtService};
pub use memory_store::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use razorpay::{RazorpayApi, RazorpayClient};
pub use store::PaymentStore;

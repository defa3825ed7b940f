pub mod file;
pub mod payment;
pub mod product;
pub mod subscription;
pub mod user;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Offset pagination shared by list endpoints.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PageQuery {
    #[validate(range(min = 0, message = "start must not be negative"))]
    pub start: Option<i64>,
    #[validate(range(min = 1, max = 100, message = "limit must be between 1 and 100"))]
    pub limit: Option<i64>,
}

impl PageQuery {
    pub const DEFAULT_LIMIT: i64 = 20;

    pub fn start(&self) -> i64 {
        self.start.unwrap_or(0)
    }

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

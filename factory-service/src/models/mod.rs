//! Domain models persisted by the factory service.

pub mod file;
pub mod product_plan;
pub mod subscription;
pub mod transaction;
pub mod user;

pub use file::{CreateFile, StoredFile};
pub use product_plan::{
    Currency, PlanSortField, PlanType, ProductPlan, ProductPlanFilter, SortOrder,
};
pub use subscription::{
    CreateUserSubscription, SubscriptionFilter, SubscriptionStatus, UserSubscription,
};
pub use transaction::{CreateTransaction, Transaction, TransactionStatus};
pub use user::{User, UserRole};

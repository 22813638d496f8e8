//! Storage plan catalog
//!
//! A plan code maps to a fixed monthly price and default quota at creation
//! time. The price captured on the bucket row is immutable for the life of
//! the bucket; changing a plan's list price later affects new buckets only.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::error::{StorageError, StorageResult};

/// One sellable storage plan.
#[derive(Debug, Clone, Serialize)]
pub struct StoragePlan {
    pub code: &'static str,
    /// Monthly price in rubles.
    pub monthly_price: Decimal,
    pub quota_gb: i32,
}

/// The catalog the panel currently sells.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: Vec<StoragePlan>,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self {
            plans: vec![
                StoragePlan {
                    code: "s3-10",
                    monthly_price: dec!(99),
                    quota_gb: 10,
                },
                StoragePlan {
                    code: "s3-50",
                    monthly_price: dec!(199),
                    quota_gb: 50,
                },
                StoragePlan {
                    code: "s3-250",
                    monthly_price: dec!(499),
                    quota_gb: 250,
                },
                StoragePlan {
                    code: "s3-1000",
                    monthly_price: dec!(1490),
                    quota_gb: 1000,
                },
            ],
        }
    }
}

impl PlanCatalog {
    /// Resolve a plan code, failing with `UnknownPlan` for anything not
    /// currently sold.
    pub fn resolve(&self, code: &str) -> StorageResult<&StoragePlan> {
        self.plans
            .iter()
            .find(|p| p.code == code)
            .ok_or_else(|| StorageError::UnknownPlan(code.to_string()))
    }

    pub fn all(&self) -> &[StoragePlan] {
        &self.plans
    }
}

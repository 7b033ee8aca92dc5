//! Operation and entity discriminators shared by the stores and the orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of orchestrated operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Unfiltered pull of a source table.
    Pull,
    /// Pull restricted by a field/value predicate.
    PullFiltered,
    /// Pull of sales orders (`SC5`) within a date period.
    PullOrders,
    /// Pull of invoices (`SF2`) within a date period.
    PullInvoices,
    /// Administrative reset of a table's local cached data.
    ResetTable,
    /// Create-or-update of one or more customers.
    CreateOrUpdateCustomer,
    /// Creation of one or more sales orders.
    CreateSalesOrder,
}

impl OperationKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Pull,
        Self::PullFiltered,
        Self::PullOrders,
        Self::PullInvoices,
        Self::ResetTable,
        Self::CreateOrUpdateCustomer,
        Self::CreateSalesOrder,
    ];

    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::PullFiltered => "pull_filtered",
            Self::PullOrders => "pull_orders",
            Self::PullInvoices => "pull_invoices",
            Self::ResetTable => "reset_table",
            Self::CreateOrUpdateCustomer => "create_or_update_customer",
            Self::CreateSalesOrder => "create_sales_order",
        }
    }

    /// Whether the operation only reads from the remote system.
    #[must_use]
    pub const fn is_pull(&self) -> bool {
        matches!(
            self,
            Self::Pull | Self::PullFiltered | Self::PullOrders | Self::PullInvoices
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown operation kind: {s}"))
    }
}

/// Mapping namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Customer,
    SalesOrder,
}

impl EntityType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::SalesOrder => "sales_order",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Self::Customer),
            "sales_order" | "order" => Ok(Self::SalesOrder),
            other => Err(format!("unknown entity type: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_kind_round_trips_through_storage_string() {
        for kind in OperationKind::ALL {
            assert_eq!(kind.as_str().parse::<OperationKind>().unwrap(), kind);
        }
        assert!("push".parse::<OperationKind>().is_err());
    }

    #[test]
    fn entity_type_accepts_order_alias() {
        assert_eq!("order".parse::<EntityType>().unwrap(), EntityType::SalesOrder);
        assert_eq!(EntityType::Customer.to_string(), "customer");
    }
}

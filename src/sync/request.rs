//! Sync requests and their validation.
//!
//! Every inbound request is validated and reduced to a [`Prepared`] job
//! before the idempotency check, so a malformed request never reserves a
//! key or opens a run.

use crate::error::{Error, Result};
use crate::model::OperationKind;
use crate::remote::{FieldFilter, TableQuery};
use crate::validate::{self, INVOICES_TABLE, ORDERS_TABLE};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Fetch a whole table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub table: String,
    #[serde(default)]
    pub reset: bool,
}

/// Fetch the rows of a table whose `field` equals `value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRequest {
    pub table: String,
    #[serde(alias = "campo")]
    pub field: String,
    #[serde(alias = "valor")]
    pub value: String,
}

/// Fetch orders or invoices issued within a `yyyymmdd` period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRequest {
    #[serde(alias = "dtDe")]
    pub from: String,
    #[serde(alias = "dtAte")]
    pub to: String,
}

/// Drop the local copies of a table's pulled data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetRequest {
    pub table: String,
}

/// One orchestrated operation with its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Pull(PullRequest),
    PullFiltered(FilterRequest),
    PullOrders(PeriodRequest),
    PullInvoices(PeriodRequest),
    ResetTable(ResetRequest),
    /// `{"CLIENTES": [...]}`, a bare array, or a single record.
    Customers(Value),
    /// `{"PEDIDOS": [...]}`, a bare array, or a single record.
    SalesOrders(Value),
}

impl Operation {
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::Pull(_) => OperationKind::Pull,
            Self::PullFiltered(_) => OperationKind::PullFiltered,
            Self::PullOrders(_) => OperationKind::PullOrders,
            Self::PullInvoices(_) => OperationKind::PullInvoices,
            Self::ResetTable(_) => OperationKind::ResetTable,
            Self::Customers(_) => OperationKind::CreateOrUpdateCustomer,
            Self::SalesOrders(_) => OperationKind::CreateSalesOrder,
        }
    }

    /// Check the request without running it.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an unknown table, a malformed period, an
    /// empty filter, or an empty or malformed batch.
    pub fn validate(&self) -> Result<()> {
        prepare(self.clone()).map(drop)
    }
}

/// What a validated operation will do.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Work {
    Fetch(TableQuery),
    Reset(String),
    Customers(Vec<Value>),
    SalesOrders(Vec<Value>),
}

/// A validated operation, ready for the idempotency check.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Prepared {
    pub kind: OperationKind,
    /// Table name or entity type, recorded on the run.
    pub target: String,
    /// Canonical request used for fingerprinting and key derivation.
    pub payload: Value,
    /// Cache scope; pull results are scoped by table so a reset can drop them.
    pub scope: Option<String>,
    pub work: Work,
}

impl Prepared {
    fn fetch(kind: OperationKind, query: TableQuery, payload: Value) -> Self {
        Self {
            kind,
            target: query.table.clone(),
            scope: Some(query.table.clone()),
            payload,
            work: Work::Fetch(query),
        }
    }
}

/// Validate an operation.
///
/// # Errors
///
/// Returns `Validation` for an unknown table, a malformed period, an empty
/// filter, or an empty or malformed batch.
pub(crate) fn prepare(op: Operation) -> Result<Prepared> {
    let kind = op.kind();
    match op {
        Operation::Pull(req) => {
            let table = validate::ensure_table(&req.table)?;
            let payload = json!({ "table": table, "reset": req.reset });
            let mut query = TableQuery::new(table);
            query.reset = req.reset;
            Ok(Prepared::fetch(kind, query, payload))
        }
        Operation::PullFiltered(req) => {
            let table = validate::ensure_table(&req.table)?;
            let field = validate::required("filter field", &req.field)?;
            let value = validate::required("filter value", &req.value)?;
            let payload = json!({ "table": table, "field": field, "value": value });
            let mut query = TableQuery::new(table);
            query.filter = Some(FieldFilter { field, value });
            Ok(Prepared::fetch(kind, query, payload))
        }
        Operation::PullOrders(req) | Operation::PullInvoices(req) => {
            let table = if kind == OperationKind::PullOrders {
                ORDERS_TABLE
            } else {
                INVOICES_TABLE
            };
            let period = validate::validate_period(&req.from, &req.to)?;
            let payload = json!({ "table": table, "from": period.from, "to": period.to });
            let mut query = TableQuery::new(table);
            query.period = Some(period);
            Ok(Prepared::fetch(kind, query, payload))
        }
        Operation::ResetTable(req) => {
            let table = validate::ensure_table(&req.table)?;
            Ok(Prepared {
                kind,
                target: table.clone(),
                payload: json!({ "table": table }),
                scope: None,
                work: Work::Reset(table),
            })
        }
        Operation::Customers(body) => {
            let records = parse_batch(body, "CLIENTES")?;
            Ok(Prepared {
                kind,
                target: "customer".to_string(),
                payload: json!({ "CLIENTES": records }),
                scope: None,
                work: Work::Customers(records),
            })
        }
        Operation::SalesOrders(body) => {
            let records: Vec<Value> = parse_batch(body, "PEDIDOS")?
                .iter()
                .map(apply_order_defaults)
                .collect();
            Ok(Prepared {
                kind,
                target: "sales_order".to_string(),
                payload: json!({ "PEDIDOS": records }),
                scope: None,
                work: Work::SalesOrders(records),
            })
        }
    }
}

/// Unwrap a batch body: `{envelope: [...]}`, a bare array, or one record.
///
/// # Errors
///
/// Returns `Validation` if the batch is empty or not JSON objects/arrays.
pub fn parse_batch(body: Value, envelope: &str) -> Result<Vec<Value>> {
    let records = match body {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove(envelope) {
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(Error::Validation(format!("{envelope} must be an array")));
            }
            None => vec![Value::Object(obj)],
        },
        _ => {
            return Err(Error::Validation(format!(
                "batch must be an object or an array of {envelope} records"
            )));
        }
    };

    if records.is_empty() {
        return Err(Error::Validation(format!("{envelope} is empty")));
    }
    Ok(records)
}

fn first_present(record: &Value, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| {
        let text = match record.get(*field)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        (!text.is_empty()).then_some(text)
    })
}

/// Local key of a customer: `A1_CPEDX`, else the tax id `A1_CGC`.
#[must_use]
pub fn customer_key(record: &Value) -> Option<String> {
    first_present(record, &["A1_CPEDX", "A1_CGC"])
}

/// Local key of a sales order: `C5_NUMEXT`, else `C5_BIEPRE`, else `C5_CPEDX`.
#[must_use]
pub fn order_key(record: &Value) -> Option<String> {
    first_present(record, &["C5_NUMEXT", "C5_BIEPRE", "C5_CPEDX"])
}

/// Fill the order fields the ERP requires but callers usually omit.
///
/// Existing values are never replaced.
#[must_use]
pub fn apply_order_defaults(record: &Value) -> Value {
    let mut order = record.clone();
    let Some(obj) = order.as_object_mut() else {
        return order;
    };

    for (field, default) in [("C5_BIEFPGA", "BOL"), ("C5_TIPO", "N"), ("C5_NATUREZ", "2001")] {
        obj.entry(field)
            .or_insert_with(|| Value::String(default.to_string()));
    }

    if let Some(Value::Array(items)) = obj.get_mut("ITENS") {
        for item in items.iter_mut().filter_map(Value::as_object_mut) {
            item.entry("C6_LOCAL")
                .or_insert_with(|| Value::String("13".to_string()));
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_batch_shapes() {
        let envelope = json!({"CLIENTES": [{"A1_CPEDX": "C1"}, {"A1_CPEDX": "C2"}]});
        assert_eq!(parse_batch(envelope, "CLIENTES").unwrap().len(), 2);

        let bare = json!([{"A1_CPEDX": "C1"}]);
        assert_eq!(parse_batch(bare, "CLIENTES").unwrap().len(), 1);

        let single = json!({"A1_CPEDX": "C1"});
        assert_eq!(parse_batch(single, "CLIENTES").unwrap()[0]["A1_CPEDX"], "C1");
    }

    #[test]
    fn test_parse_batch_rejects_empty_and_scalars() {
        assert!(parse_batch(json!({"PEDIDOS": []}), "PEDIDOS").is_err());
        assert!(parse_batch(json!([]), "PEDIDOS").is_err());
        assert!(parse_batch(json!({"PEDIDOS": {}}), "PEDIDOS").is_err());
        assert!(parse_batch(json!("x"), "PEDIDOS").is_err());
    }

    #[test]
    fn test_customer_key_prefers_cpedx() {
        assert_eq!(
            customer_key(&json!({"A1_CPEDX": "TESTE-001", "A1_CGC": "123"})).as_deref(),
            Some("TESTE-001")
        );
        assert_eq!(
            customer_key(&json!({"A1_CPEDX": "  ", "A1_CGC": "123"})).as_deref(),
            Some("123")
        );
        assert!(customer_key(&json!({"A1_NOME": "ACME"})).is_none());
    }

    #[test]
    fn test_order_key_precedence() {
        let order = json!({"C5_CPEDX": "C", "C5_BIEPRE": "B"});
        assert_eq!(order_key(&order).as_deref(), Some("B"));
        let order = json!({"C5_CPEDX": "C", "C5_BIEPRE": "B", "C5_NUMEXT": "A"});
        assert_eq!(order_key(&order).as_deref(), Some("A"));
        assert!(order_key(&json!({})).is_none());
    }

    #[test]
    fn test_order_defaults_fill_but_never_replace() {
        let order = apply_order_defaults(&json!({
            "C5_NUMEXT": "PED-1",
            "C5_TIPO": "D",
            "ITENS": [{"C6_PRODUTO": "P1"}, {"C6_PRODUTO": "P2", "C6_LOCAL": "01"}]
        }));
        assert_eq!(order["C5_BIEFPGA"], "BOL");
        assert_eq!(order["C5_TIPO"], "D");
        assert_eq!(order["C5_NATUREZ"], "2001");
        assert_eq!(order["ITENS"][0]["C6_LOCAL"], "13");
        assert_eq!(order["ITENS"][1]["C6_LOCAL"], "01");
    }

    #[test]
    fn test_prepare_validates_before_anything_runs() {
        assert!(
            prepare(Operation::Pull(PullRequest {
                table: "XX1".into(),
                reset: false,
            }))
            .is_err()
        );
        assert!(
            prepare(Operation::PullFiltered(FilterRequest {
                table: "SA1".into(),
                field: " ".into(),
                value: "1".into(),
            }))
            .is_err()
        );
        assert!(
            prepare(Operation::PullOrders(PeriodRequest {
                from: "20260201".into(),
                to: "20260101".into(),
            }))
            .is_err()
        );
    }

    #[test]
    fn test_prepare_period_targets_fixed_tables() {
        let period = PeriodRequest {
            from: "20260101".into(),
            to: "20260131".into(),
        };
        let orders = prepare(Operation::PullOrders(period.clone())).unwrap();
        let invoices = prepare(Operation::PullInvoices(period)).unwrap();
        assert_eq!(orders.target, "SC5");
        assert_eq!(invoices.target, "SF2");
        assert_eq!(orders.scope.as_deref(), Some("SC5"));
    }

    #[test]
    fn test_validate_leaves_operation_untouched() {
        let op = Operation::SalesOrders(json!([{"C5_NUMEXT": "PED-1"}]));
        op.validate().unwrap();
        assert_eq!(op, Operation::SalesOrders(json!([{"C5_NUMEXT": "PED-1"}])));

        let bad = Operation::ResetTable(ResetRequest { table: "ZZ9".into() });
        assert!(matches!(bad.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_prepare_orders_hashes_defaults() {
        let bare = prepare(Operation::SalesOrders(json!([{"C5_NUMEXT": "PED-1"}]))).unwrap();
        let explicit = prepare(Operation::SalesOrders(json!({"PEDIDOS": [{
            "C5_NUMEXT": "PED-1", "C5_BIEFPGA": "BOL", "C5_TIPO": "N", "C5_NATUREZ": "2001"
        }]})))
        .unwrap();
        assert_eq!(bare.payload, explicit.payload);
    }

    #[test]
    fn test_period_request_accepts_original_field_names() {
        let req: PeriodRequest =
            serde_json::from_value(json!({"dtDe": "20260101", "dtAte": "20260131"})).unwrap();
        assert_eq!(req.from, "20260101");
    }
}

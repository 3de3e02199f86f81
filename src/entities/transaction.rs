use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payment method tag written by the M-Pesa reconciler. The duplicate guard
/// on (sale, method, amount) keys off this exact value.
pub const PAYMENT_METHOD_MPESA: &str = "MPesa";

/// Ledger transaction: one row per confirmed payment event.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub sale_id: Option<Uuid>,
    pub store_id: Uuid,
    pub contact_id: Option<Uuid>,
    pub transaction_date: DateTime<Utc>,
    pub amount: Decimal,
    /// e.g. "MPesa", "Cash", "Cheque"
    pub payment_method: String,
    /// e.g. "sale", "refund"
    pub transaction_type: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::sale::Entity",
        from = "Column::SaleId",
        to = "super::sale::Column::Id"
    )]
    Sale,
}

impl Related<super::sale::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sale.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A POS sale. Owned by the checkout flow; the payment reconciler only
/// increments `amount_received` and flips the status fields.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sales")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub invoice_number: Option<String>,
    pub store_id: Uuid,
    pub contact_id: Option<Uuid>,
    pub sale_date: DateTime<Utc>,
    pub total_amount: Decimal,
    pub discount: Decimal,
    pub amount_received: Decimal,
    /// completed | pending | refunded
    pub status: String,
    /// completed | pending | pending_mpesa
    pub payment_status: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::transaction::Entity")]
    Transactions,
    #[sea_orm(has_many = "super::mpesa_payment::Entity")]
    MpesaPayments,
}

impl Related<super::transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transactions.def()
    }
}

impl Related<super::mpesa_payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MpesaPayments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// A sale is settled once the received amount covers the total due.
    pub fn is_settled(&self) -> bool {
        self.amount_received >= self.total_amount
    }
}

use std::{fmt, str::FromStr};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use tokio_postgres::Row;
use tracing::error;
use uuid::Uuid;

use crate::{
    db::PostgresStore,
    web::bill::data::{NewBillFields, UploadCandidate},
};

pub const DEFAULT_PCT: i32 = 20;

/// Failure reported by the bills backend. The message is shown to users
/// exactly as received.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct GatewayError {
    message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NotFound,
    Server,
    Generic,
}

impl GatewayError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn server() -> Self {
        Self::new("Erreur 500")
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> FailureKind {
        if self.message.contains("404") {
            FailureKind::NotFound
        } else if self.message.contains("500") {
            FailureKind::Server
        } else {
            FailureKind::Generic
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpenseType {
    Transports,
    Restaurants,
    Hotel,
    OnlineServices,
    It,
    Equipment,
    OfficeSupplies,
}

impl ExpenseType {
    pub const ALL: [ExpenseType; 7] = [
        ExpenseType::Transports,
        ExpenseType::Restaurants,
        ExpenseType::Hotel,
        ExpenseType::OnlineServices,
        ExpenseType::It,
        ExpenseType::Equipment,
        ExpenseType::OfficeSupplies,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ExpenseType::Transports => "Transports",
            ExpenseType::Restaurants => "Restaurants et bars",
            ExpenseType::Hotel => "Hôtel et logement",
            ExpenseType::OnlineServices => "Services en ligne",
            ExpenseType::It => "IT et électronique",
            ExpenseType::Equipment => "Equipement et matériel",
            ExpenseType::OfficeSupplies => "Fournitures de bureau",
        }
    }
}

impl fmt::Display for ExpenseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ExpenseType {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExpenseType::ALL
            .into_iter()
            .find(|t| t.label() == s.trim())
            .ok_or_else(|| PayloadError::UnknownExpenseType(s.to_owned()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillStatus {
    Pending,
    Accepted,
    Refused,
}

impl BillStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            BillStatus::Pending => "pending",
            BillStatus::Accepted => "accepted",
            BillStatus::Refused => "refused",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, anyhow::Error> {
        match s {
            "pending" => Ok(BillStatus::Pending),
            "accepted" => Ok(BillStatus::Accepted),
            "refused" => Ok(BillStatus::Refused),
            other => Err(anyhow!("invalid bill status {other}")),
        }
    }
}

impl fmt::Display for BillStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BillStatus::Pending => "En attente",
            BillStatus::Accepted => "Accepté",
            BillStatus::Refused => "Refusé",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BillRecord {
    pub id: Uuid,
    pub email: String,
    pub expense_type: ExpenseType,
    pub name: String,
    pub date: String, // ISO-8601, YYYY-MM-DD
    pub amount: i64,
    pub vat: Option<i64>,
    pub pct: i32,
    pub commentary: String,
    pub status: BillStatus,
    pub receipt_name: String,
    pub receipt_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("Type de dépense inconnu : {0}")]
    UnknownExpenseType(String),
    #[error("Date invalide : {0}")]
    InvalidDate(String),
    #[error("Montant invalide : {0}")]
    InvalidAmount(String),
    #[error("TVA invalide : {0}")]
    InvalidVat(String),
    #[error("Pourcentage invalide : {0}")]
    InvalidPct(String),
    #[error("Adresse e-mail manquante")]
    MissingEmail,
    #[error("Justificatif manquant")]
    MissingReceipt,
}

/// A validated new bill, ready for the gateway.
#[derive(Debug, Clone)]
pub struct BillPayload {
    pub email: String,
    pub expense_type: ExpenseType,
    pub name: String,
    pub date: NaiveDate,
    pub amount: i64,
    pub vat: Option<i64>,
    pub pct: i32,
    pub commentary: String,
    pub status: BillStatus,
    pub receipt: UploadCandidate,
}

impl BillPayload {
    pub fn try_new(
        fields: &NewBillFields,
        email: &str,
        receipt: Option<UploadCandidate>,
    ) -> Result<Self, PayloadError> {
        if email.trim().is_empty() {
            return Err(PayloadError::MissingEmail);
        }
        let expense_type = ExpenseType::from_str(&fields.expense_type)?;
        let date = NaiveDate::parse_from_str(fields.date.trim(), "%Y-%m-%d")
            .map_err(|_| PayloadError::InvalidDate(fields.date.clone()))?;
        let amount = fields
            .amount
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|a| *a > 0)
            .ok_or_else(|| PayloadError::InvalidAmount(fields.amount.clone()))?;
        let vat = match fields.vat.trim() {
            "" => None,
            v => Some(
                v.parse::<i64>()
                    .ok()
                    .filter(|v| *v >= 0)
                    .ok_or_else(|| PayloadError::InvalidVat(fields.vat.clone()))?,
            ),
        };
        let pct = match fields.pct.trim() {
            "" => DEFAULT_PCT,
            p => p
                .parse::<i32>()
                .ok()
                .filter(|p| (0..=100).contains(p))
                .ok_or_else(|| PayloadError::InvalidPct(fields.pct.clone()))?,
        };
        let receipt = receipt.ok_or(PayloadError::MissingReceipt)?;

        Ok(Self {
            email: email.trim().to_owned(),
            expense_type,
            name: fields.name.trim().to_owned(),
            date,
            amount,
            vat,
            pct,
            commentary: fields.commentary.trim().to_owned(),
            status: BillStatus::Pending,
            receipt,
        })
    }
}

/// Whose bills a listing returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillScope {
    All,
    Owner(String),
}

impl BillScope {
    pub fn owner(&self) -> Option<&str> {
        match self {
            BillScope::All => None,
            BillScope::Owner(email) => Some(email),
        }
    }
}

#[async_trait]
pub trait BillsGateway: Send + Sync {
    async fn list(&self, scope: &BillScope) -> Result<Vec<BillRecord>, GatewayError>;
    async fn create(&self, payload: &BillPayload) -> Result<BillRecord, GatewayError>;
}

pub fn receipt_url(receipt_id: &Uuid) -> String {
    format!("/receipts/{receipt_id}")
}

impl PostgresStore {
    async fn list_bills(&self, owner: Option<&str>) -> Result<Vec<BillRecord>, anyhow::Error> {
        let rows = self
            .pool
            .get()
            .await?
            .query(
                "SELECT id, email, expense_type, name, date, amount, vat, pct, commentary, status, receipt_name, receipt_id, created_at FROM bill WHERE ($1::TEXT IS NULL OR email = $1) ORDER BY created_at DESC",
                &[&owner],
            )
            .await?;
        rows.iter().map(row_to_bill).collect()
    }

    async fn create_bill(&self, payload: &BillPayload) -> Result<BillRecord, anyhow::Error> {
        let id = Uuid::new_v4();
        let receipt_id = Uuid::new_v4();
        let created_at = Utc::now();

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        tx.execute(
            r#"INSERT INTO receipt
                    (id, file_name, content_type, content)
                VALUES
                    ($1, $2, $3, $4)
            "#,
            &[
                &receipt_id,
                &payload.receipt.file_name,
                &payload.receipt.content_type,
                &payload.receipt.content,
            ],
        )
        .await?;
        tx.execute(
            r#"INSERT INTO bill
                    (id, email, expense_type, name, date, amount, vat, pct, commentary, status, receipt_name, receipt_id, created_at)
                VALUES
                    ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
            &[
                &id,
                &payload.email,
                &payload.expense_type.label(),
                &payload.name,
                &payload.date,
                &payload.amount,
                &payload.vat,
                &payload.pct,
                &payload.commentary,
                &payload.status.as_db_str(),
                &payload.receipt.file_name,
                &receipt_id,
                &created_at,
            ],
        )
        .await?;
        tx.commit().await?;

        Ok(BillRecord {
            id,
            email: payload.email.clone(),
            expense_type: payload.expense_type,
            name: payload.name.clone(),
            date: payload.date.format("%Y-%m-%d").to_string(),
            amount: payload.amount,
            vat: payload.vat,
            pct: payload.pct,
            commentary: payload.commentary.clone(),
            status: payload.status,
            receipt_name: payload.receipt.file_name.clone(),
            receipt_url: receipt_url(&receipt_id),
            created_at,
        })
    }
}

#[async_trait]
impl BillsGateway for PostgresStore {
    async fn list(&self, scope: &BillScope) -> Result<Vec<BillRecord>, GatewayError> {
        self.list_bills(scope.owner()).await.map_err(|e| {
            error!("Error listing bills: {e}");
            GatewayError::server()
        })
    }

    async fn create(&self, payload: &BillPayload) -> Result<BillRecord, GatewayError> {
        self.create_bill(payload).await.map_err(|e| {
            error!("Error creating bill for {}: {e}", payload.email);
            GatewayError::server()
        })
    }
}

fn row_to_bill(row: &Row) -> Result<BillRecord, anyhow::Error> {
    let date: NaiveDate = row.get(4);
    let receipt_id: Uuid = row.get(11);

    Ok(BillRecord {
        id: row.get(0),
        email: row.get(1),
        expense_type: ExpenseType::from_str(&row.get::<usize, String>(2))?,
        name: row.get(3),
        date: date.format("%Y-%m-%d").to_string(),
        amount: row.get(5),
        vat: row.get(6),
        pct: row.get(7),
        commentary: row.get(8),
        status: BillStatus::from_db_str(&row.get::<usize, String>(9))?,
        receipt_name: row.get(10),
        receipt_url: receipt_url(&receipt_id),
        created_at: row.get(12),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> NewBillFields {
        NewBillFields {
            expense_type: "Transports".to_string(),
            name: "Vol Paris Londres".to_string(),
            date: "2004-04-04".to_string(),
            amount: "348".to_string(),
            vat: "70".to_string(),
            pct: "".to_string(),
            commentary: "".to_string(),
        }
    }

    fn receipt() -> UploadCandidate {
        UploadCandidate {
            file_name: "receipt.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            content: vec![1, 2, 3],
        }
    }

    #[test]
    fn gateway_error_kind_follows_message() {
        assert_eq!(GatewayError::new("Erreur 404").kind(), FailureKind::NotFound);
        assert_eq!(GatewayError::new("Erreur 500").kind(), FailureKind::Server);
        assert_eq!(GatewayError::new("timeout").kind(), FailureKind::Generic);
        assert_eq!(GatewayError::new("Erreur 404").to_string(), "Erreur 404");
    }

    #[test]
    fn expense_type_parses_labels() {
        for t in ExpenseType::ALL {
            assert_eq!(ExpenseType::from_str(t.label()).unwrap(), t);
        }
        assert!(ExpenseType::from_str("Cinéma").is_err());
    }

    #[test]
    fn payload_defaults_pct_and_starts_pending() {
        let payload = BillPayload::try_new(&fields(), "a@a", Some(receipt())).unwrap();
        assert_eq!(payload.pct, DEFAULT_PCT);
        assert_eq!(payload.vat, Some(70));
        assert_eq!(payload.status, BillStatus::Pending);
        assert_eq!(payload.date.to_string(), "2004-04-04");
    }

    #[test]
    fn payload_rejects_invalid_fields() {
        let mut f = fields();
        f.amount = "-3".to_string();
        assert!(matches!(
            BillPayload::try_new(&f, "a@a", Some(receipt())),
            Err(PayloadError::InvalidAmount(_))
        ));

        let mut f = fields();
        f.date = "04/04/2004".to_string();
        assert!(matches!(
            BillPayload::try_new(&f, "a@a", Some(receipt())),
            Err(PayloadError::InvalidDate(_))
        ));

        let mut f = fields();
        f.pct = "120".to_string();
        assert!(matches!(
            BillPayload::try_new(&f, "a@a", Some(receipt())),
            Err(PayloadError::InvalidPct(_))
        ));

        assert_eq!(
            BillPayload::try_new(&fields(), "", Some(receipt())).unwrap_err(),
            PayloadError::MissingEmail
        );
        assert_eq!(
            BillPayload::try_new(&fields(), "a@a", None).unwrap_err(),
            PayloadError::MissingReceipt
        );
    }

    #[test]
    fn payload_errors_read_in_french() {
        assert_eq!(PayloadError::MissingReceipt.to_string(), "Justificatif manquant");
        assert_eq!(
            PayloadError::InvalidAmount("-3".to_string()).to_string(),
            "Montant invalide : -3"
        );
    }
}

use async_trait::async_trait;
use uuid::Uuid;

use crate::db::PostgresStore;

#[derive(Clone, Debug)]
pub struct Receipt {
    pub file_name: String,
    pub content_type: String,
    pub content: Vec<u8>,
    /// Email of the bill the receipt is attached to
    pub owner: String,
}

#[async_trait]
pub trait ReceiptStore: Send + Sync {
    async fn get_receipt(&self, id: &Uuid) -> Result<Option<Receipt>, anyhow::Error>;
}

#[async_trait]
impl ReceiptStore for PostgresStore {
    async fn get_receipt(&self, id: &Uuid) -> Result<Option<Receipt>, anyhow::Error> {
        let row = self
            .pool
            .get()
            .await?
            .query_opt(
                r#"SELECT r.file_name, r.content_type, r.content, b.email
                    FROM receipt r JOIN bill b ON b.receipt_id = r.id
                    WHERE r.id = $1
                "#,
                &[&id],
            )
            .await?;
        Ok(row.map(|r| Receipt {
            file_name: r.get(0),
            content_type: r.get(1),
            content: r.get(2),
            owner: r.get(3),
        }))
    }
}

use crate::db::bill::{FailureKind, GatewayError};

#[derive(Debug, Clone)]
pub struct BillForList {
    pub id: String,
    pub expense_type: String,
    pub name: String,
    pub date: String,
    pub amount: i64,
    pub status: String,
    pub owner: String,
    pub receipt_url: String,
}

/// A file picked in the new bill form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCandidate {
    pub file_name: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

impl UploadCandidate {
    /// Subtype of an `image/*` content type, the file extension when the
    /// client sent none. Any other content type is returned whole so it
    /// never matches an image subtype. Lowercased, never checked against
    /// the content.
    pub fn declared_type(&self) -> String {
        let mime = self
            .content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if mime.is_empty() {
            return self
                .file_name
                .rsplit_once('.')
                .map(|(_, ext)| ext.to_ascii_lowercase())
                .unwrap_or_default();
        }
        match mime.split_once('/') {
            Some(("image", sub)) => sub.to_owned(),
            _ => mime,
        }
    }

    /// Content type stored and served for an accepted receipt
    pub fn image_mime(&self) -> Option<&'static str> {
        match self.declared_type().as_str() {
            "png" => Some("image/png"),
            "jpeg" | "jpg" => Some("image/jpeg"),
            _ => None,
        }
    }
}

/// Raw text fields of the new bill form
#[derive(Debug, Clone, Default)]
pub struct NewBillFields {
    pub expense_type: String,
    pub name: String,
    pub date: String,
    pub amount: String,
    pub vat: String,
    pub pct: String,
    pub commentary: String,
}

#[derive(Debug, Clone)]
pub struct ErrorBanner {
    pub class: &'static str,
    pub message: String,
}

impl From<&GatewayError> for ErrorBanner {
    fn from(e: &GatewayError) -> Self {
        let class = match e.kind() {
            FailureKind::NotFound => "error-not-found",
            FailureKind::Server => "error-server",
            FailureKind::Generic => "error-generic",
        };
        Self {
            class,
            message: e.message().to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewModal {
    pub receipt_url: String,
}

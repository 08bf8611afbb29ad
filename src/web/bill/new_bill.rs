use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::{
    db::bill::{BillPayload, BillRecord, BillsGateway, GatewayError, PayloadError},
    web::{
        bill::data::{NewBillFields, UploadCandidate},
        navigation::{Navigator, Route},
        session::SessionUser,
    },
};

/// Shown verbatim when a receipt is not an image
pub const FILE_TYPE_WARNING: &str = "Veuillez appliquez un fichier en .png .jpeg .jpg";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    Accepted,
    Rejected { warning: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitState {
    Idle,
    Submitting,
    Succeeded,
    Failed(String),
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Invalid(#[from] PayloadError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

pub struct NewBillForm {
    gateway: Arc<dyn BillsGateway>,
    navigator: Arc<dyn Navigator>,
    user: SessionUser,
    pending: Option<UploadCandidate>,
    warning: Option<&'static str>,
    state: SubmitState,
}

impl NewBillForm {
    pub fn new(
        gateway: Arc<dyn BillsGateway>,
        navigator: Arc<dyn Navigator>,
        user: SessionUser,
    ) -> Self {
        Self {
            gateway,
            navigator,
            user,
            pending: None,
            warning: None,
            state: SubmitState::Idle,
        }
    }

    pub fn state(&self) -> &SubmitState {
        &self.state
    }

    pub fn warning(&self) -> Option<&'static str> {
        self.warning
    }

    /// Name of the retained receipt, empty when the input was reset
    pub fn file_input_value(&self) -> &str {
        self.pending
            .as_ref()
            .map(|f| f.file_name.as_str())
            .unwrap_or_default()
    }

    /// Every selection is judged on its own; a rejected one also drops any
    /// file accepted before it. Accepted files keep a canonical content type
    /// instead of the one the client sent.
    pub fn handle_file_selected(&mut self, mut file: UploadCandidate) -> ValidationResult {
        if let Some(mime) = file.image_mime() {
            file.content_type = mime.to_owned();
            self.pending = Some(file);
            self.warning = None;
            ValidationResult::Accepted
        } else {
            warn!(
                "Rejected receipt {} with declared type {:?}",
                file.file_name,
                file.declared_type()
            );
            self.pending = None;
            self.warning = Some(FILE_TYPE_WARNING);
            ValidationResult::Rejected {
                warning: FILE_TYPE_WARNING,
            }
        }
    }

    pub async fn handle_submit(&mut self, fields: &NewBillFields) -> Result<BillRecord, SubmitError> {
        let payload = match BillPayload::try_new(fields, self.user.email(), self.pending.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                self.state = SubmitState::Failed(e.to_string());
                return Err(e.into());
            }
        };

        self.state = SubmitState::Submitting;
        match self.gateway.create(&payload).await {
            Ok(bill) => {
                info!("Created bill {} for {}", bill.id, bill.email);
                self.state = SubmitState::Succeeded;
                self.pending = None;
                self.navigator.on_navigate(Route::Bills);
                Ok(bill)
            }
            Err(e) => {
                warn!("Error creating bill for {}: {e}", payload.email);
                self.state = SubmitState::Failed(e.message().to_owned());
                Err(e.into())
            }
        }
    }
}

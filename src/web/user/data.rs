use serde::Deserialize;

use crate::db::user::Role;

const MAX_EMAIL_LEN: usize = 254;

#[derive(Debug, Clone, Deserialize)]
pub struct LoginData {
    pub csrf_token: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

impl LoginData {
    pub fn validate(&self) -> bool {
        let email = self.email.trim();
        if email.is_empty() || email.len() > MAX_EMAIL_LEN {
            return false;
        }
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => (),
            _ => return false,
        }
        !self.password.is_empty()
    }
}

//! HTTP handlers, one file per resource family.

use actix_web::web;

use crate::error::{AppError, AppResult};

pub mod billing;
pub mod integrations;
pub mod masters;
pub mod patients;
pub mod system;
pub mod visits;

/// Optional free-text `?search=` filter shared by the list endpoints.
#[derive(Debug, Default, serde::Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub search: Option<String>,
}

impl SearchQuery {
    pub fn into_search(self) -> Option<String> {
        self.search.filter(|s| !s.trim().is_empty())
    }
}

/// Import uploads arrive as raw CSV/TSV text.
pub(crate) fn upload_text(body: web::Bytes) -> AppResult<String> {
    String::from_utf8(body.to_vec()).map_err(|_| AppError::BadRequest("import file must be UTF-8 text".into()))
}

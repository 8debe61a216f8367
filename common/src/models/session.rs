//! Request bodies accepted by the session service.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Edits to the session's free-text inputs. Absent fields are left unchanged.
#[derive(Debug, Default, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionInputRequest {
    /// Connection string being edited.
    #[validate(length(max = 2048, message = "Connection string is too long"))]
    pub connection_string: Option<String>,

    /// Query text; empty selects every document.
    #[validate(length(max = 65536, message = "Query is too long"))]
    pub query: Option<String>,

    /// Page size as typed; unparsable or non-positive values mean 10.
    #[validate(length(max = 10, message = "Limit is too long"))]
    pub limit: Option<String>,
}

/// Selection of a database or container by id.
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct SelectRequest {
    /// Identifier to select.
    #[validate(length(min = 1, message = "Id is required"))]
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_select_is_rejected() {
        let req = SelectRequest { id: String::new() };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_input_accepts_camel_case() {
        let req: SessionInputRequest =
            serde_json::from_str(r#"{"connectionString":"x","limit":"5"}"#).unwrap();
        assert_eq!(req.connection_string.as_deref(), Some("x"));
        assert_eq!(req.limit.as_deref(), Some("5"));
        assert!(req.query.is_none());
        assert!(req.validate().is_ok());
    }
}

use serde::{Deserialize, Serialize};

/// Terminal, fully-assembled record of one assistant turn.
///
/// Written once by the backend when a turn finishes. When `is_complete` is
/// set it is authoritative over anything rebuilt from tokens.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct CompleteResponse {
    pub full_content: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub auto_fill_data: Option<serde_json::Value>,
    #[serde(default)]
    pub stage_complete: bool,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    #[serde(default)]
    pub is_complete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_optional_fields_default() {
        let response: CompleteResponse =
            serde_json::from_str(r#"{"full_content":"All done"}"#).unwrap();
        assert_eq!(response.full_content, "All done");
        assert!(response.suggestions.is_empty());
        assert!(!response.is_complete);
        assert!(!response.stage_complete);
    }
}

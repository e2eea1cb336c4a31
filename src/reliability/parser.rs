//! First-line defense against poison input (spec §4.9).

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Reject,
    Dlq,
    Ignore,
}

/// Where poison messages are routed when `disposition == Dlq` (spec §3
/// open item, resolved in SPEC_FULL §3: a concrete dead-letter target is
/// configured on the parser's consumer).
#[derive(Debug, Clone)]
pub struct DeadLetterTarget {
    pub exchange: String,
    pub routing_key: String,
}

#[derive(Debug, Clone)]
pub struct ParserConfig {
    pub max_size: Option<usize>,
    pub disposition: Disposition,
    pub dead_letter_target: Option<DeadLetterTarget>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self { max_size: None, disposition: Disposition::Reject, dead_letter_target: None }
    }
}

#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub disposition: Disposition,
}

pub struct MessageParser {
    config: ParserConfig,
}

impl MessageParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    /// Checks, in order: byte length, absence of a NUL byte, JSON parse
    /// success, non-null decoded root (spec §4.9).
    pub fn parse(&self, body: &[u8]) -> Result<Value, ParseError> {
        if let Some(max) = self.config.max_size {
            if body.len() > max {
                return Err(self.error(format!("payload of {} bytes exceeds max_size {}", body.len(), max)));
            }
        }

        if body.contains(&0u8) {
            return Err(self.error("payload contains a NUL byte".to_string()));
        }

        let value: Value = serde_json::from_slice(body)
            .map_err(|e| self.error(format!("invalid JSON: {e}")))?;

        if value.is_null() {
            return Err(self.error("decoded JSON root is null".to_string()));
        }

        Ok(value)
    }

    fn error(&self, message: String) -> ParseError {
        ParseError { message, disposition: self.config.disposition }
    }

    pub fn dead_letter_target(&self) -> Option<&DeadLetterTarget> {
        self.config.dead_letter_target.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_json_object() {
        let parser = MessageParser::new(ParserConfig::default());
        let value = parser.parse(br#"{"a":1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn rejects_content_with_nul_byte() {
        let parser = MessageParser::new(ParserConfig { disposition: Disposition::Dlq, ..Default::default() });
        let err = parser.parse(b"{\"a\":\0\"b\"}").unwrap_err();
        assert_eq!(err.disposition, Disposition::Dlq);
    }

    #[test]
    fn rejects_invalid_json() {
        let parser = MessageParser::new(ParserConfig::default());
        let err = parser.parse(b"{not json").unwrap_err();
        assert_eq!(err.disposition, Disposition::Reject);
    }

    #[test]
    fn rejects_null_root() {
        let parser = MessageParser::new(ParserConfig::default());
        let err = parser.parse(b"null").unwrap_err();
        assert!(err.message.contains("null"));
    }

    #[test]
    fn rejects_oversize_payload() {
        let parser = MessageParser::new(ParserConfig { max_size: Some(4), ..Default::default() });
        let err = parser.parse(br#"{"a":1}"#).unwrap_err();
        assert!(err.message.contains("exceeds max_size"));
    }
}

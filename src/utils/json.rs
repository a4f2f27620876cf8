use crate::errors::{GatewayError, Result};
use bson::{Bson, Document as BsonDocument};

/// Convert a `serde_json::Value` that must be an object into a `bson::Document`.
///
/// The input is read as MongoDB extended JSON, so `{"$oid": "..."}` becomes an `ObjectId`.
pub fn json_value_to_bson_document(val: serde_json::Value) -> Result<BsonDocument> {
    match Bson::try_from(val) {
        Ok(Bson::Document(d)) => Ok(d),
        Ok(_) => Err(GatewayError::MalformedSpecification("expected JSON object".into())),
        Err(e) => Err(GatewayError::MalformedSpecification(e.to_string())),
    }
}

/// Parse a JSON string into a `bson::Document`. The JSON must be a top-level object.
pub fn parse_json_to_bson_document(json: &str) -> Result<BsonDocument> {
    let val: serde_json::Value = serde_json::from_str(json)?;
    json_value_to_bson_document(val)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_to_bson_success() {
        let d = parse_json_to_bson_document("{\"a\":1,\"b\":\"x\"}").unwrap();
        assert_eq!(d.get_i32("a").unwrap(), 1);
        assert_eq!(d.get_str("b").unwrap(), "x");
    }

    #[test]
    fn json_to_bson_rejects_array() {
        let e = parse_json_to_bson_document("[1,2,3]").unwrap_err();
        assert!(matches!(e, GatewayError::MalformedSpecification(_)));
    }

    #[test]
    fn oid_extjson_becomes_object_id() {
        let d = parse_json_to_bson_document(r#"{"_id":{"$oid":"5a1e3bd7f8b2a70b7c6d1e01"}}"#).unwrap();
        assert!(d.get_object_id("_id").is_ok());
    }
}

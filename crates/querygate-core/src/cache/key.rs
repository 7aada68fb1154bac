//! Cache key derivation.
//!
//! Two requests map to the same key iff their statement text, parameter
//! sequence (names, type tags, and values), and row cap are all equal. Keys
//! MUST separate different parameter values: collapsing them would leak one
//! client's cached rows to another.

use sha2::{Digest, Sha256};

use crate::protocol::{ParamValue, QueryRequest};

/// Derive the cache key for a request.
///
/// The key is a SHA-256 hash over, in order: the SQL text, each parameter's
/// name, type tag, and payload, and `options.max_rows`. Every variable-width
/// field is length-prefixed so adjacent fields can never alias each other.
/// Rendered as a lowercase hex string.
#[must_use]
pub fn make_key(request: &QueryRequest) -> String {
    let mut hasher = Sha256::new();

    hash_bytes(&mut hasher, request.sql.as_bytes());

    for param in &request.params {
        hash_bytes(&mut hasher, param.name.as_bytes());
        hasher.update([param.value.type_tag()]);
        match &param.value {
            ParamValue::Null => {}
            ParamValue::Bool(b) => hasher.update([u8::from(*b)]),
            ParamValue::Int(i) => hasher.update(i.to_le_bytes()),
            ParamValue::Float(f) => hasher.update(f.to_bits().to_le_bytes()),
            ParamValue::Text(s) => hash_bytes(&mut hasher, s.as_bytes()),
            ParamValue::Bytes(b) => hash_bytes(&mut hasher, b),
        }
    }

    hasher.update(request.options.max_rows.to_le_bytes());

    hex::encode(hasher.finalize())
}

fn hash_bytes(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{QueryParam, QueryType};

    fn request(sql: &str) -> QueryRequest {
        QueryRequest::new(sql, QueryType::Select)
    }

    #[test]
    fn test_key_is_deterministic() {
        let a = request("SELECT * FROM users");
        let b = request("SELECT * FROM users");
        assert_eq!(make_key(&a), make_key(&b));
    }

    #[test]
    fn test_key_is_hex() {
        let key = make_key(&request("SELECT 1"));
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_different_sql_different_key() {
        assert_ne!(
            make_key(&request("SELECT * FROM users")),
            make_key(&request("SELECT * FROM posts"))
        );
    }

    #[test]
    fn test_different_param_values_different_key() {
        let mut a = request("SELECT * FROM users WHERE id = ?");
        a.params.push(QueryParam::new("id", ParamValue::Int(1)));
        let mut b = request("SELECT * FROM users WHERE id = ?");
        b.params.push(QueryParam::new("id", ParamValue::Int(2)));
        assert_ne!(make_key(&a), make_key(&b));
    }

    #[test]
    fn test_param_type_distinguished() {
        // Same payload bytes, different type tags.
        let mut a = request("SELECT ?");
        a.params.push(QueryParam::new("p", ParamValue::Text("1".to_string())));
        let mut b = request("SELECT ?");
        b.params
            .push(QueryParam::new("p", ParamValue::Bytes(vec![b'1'])));
        assert_ne!(make_key(&a), make_key(&b));
    }

    #[test]
    fn test_max_rows_affects_key() {
        let a = request("SELECT * FROM users");
        let mut b = request("SELECT * FROM users");
        b.options.max_rows = 10;
        assert_ne!(make_key(&a), make_key(&b));
    }

    #[test]
    fn test_irrelevant_options_do_not_affect_key() {
        let a = request("SELECT * FROM users");
        let mut b = request("SELECT * FROM users");
        b.options.timeout_ms = 99;
        b.options.read_only = true;
        assert_eq!(make_key(&a), make_key(&b));
    }
}

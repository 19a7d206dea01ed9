//! CouchDB documents as seen by the benchmarks.

use crate::{Revision, TypesError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn is_false(value: &bool) -> bool {
    !*value
}

/// A JSON document with CouchDB's reserved fields split out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document id (`_id`).
    #[serde(rename = "_id")]
    pub id: String,
    /// Current revision (`_rev`), absent for new documents.
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// Revision history (`_revisions`), present when fetched with `revs=true`.
    #[serde(rename = "_revisions", default, skip_serializing_if = "Option::is_none")]
    pub revisions: Option<Revisions>,
    /// Tombstone marker (`_deleted`).
    #[serde(rename = "_deleted", default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    /// All remaining fields.
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Document {
    /// Create an empty document with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            revisions: None,
            deleted: false,
            body: Map::new(),
        }
    }

    /// Build a document from a JSON object addressed by `id`, as in
    /// `PUT /db/{id}`. The path id replaces any `_id` in the body.
    pub fn from_json(id: impl Into<String>, mut body: Map<String, Value>) -> Result<Self, TypesError> {
        body.insert("_id".into(), Value::String(id.into()));
        Ok(serde_json::from_value(Value::Object(body))?)
    }

    /// Create a benchmark document with random `foo` and `bar` fields.
    pub fn bench<R: Rng + ?Sized>(id: impl Into<String>, rng: &mut R) -> Self {
        let mut doc = Self::new(id);
        doc.randomize(rng);
        doc
    }

    /// Overwrite `foo` and `bar` with fresh random values.
    pub fn randomize<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.body.insert("foo".into(), Value::from(rng.gen::<f64>()));
        self.body.insert("bar".into(), Value::from(rng.gen::<f64>()));
    }

    /// Set a body field, returning the document for chaining.
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.body.insert(key.to_string(), value.into());
        self
    }

    /// Set the current revision, returning the document for chaining.
    pub fn with_rev(mut self, rev: impl Into<String>) -> Self {
        self.rev = Some(rev.into());
        self
    }

    /// Read a numeric body field.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.body.get(key).and_then(Value::as_f64)
    }

    /// Parse the current revision, if any.
    pub fn revision(&self) -> Result<Option<Revision>, TypesError> {
        self.rev.as_deref().map(str::parse).transpose()
    }

    /// Check that the document can be written.
    pub fn validate(&self) -> Result<(), TypesError> {
        if self.id.is_empty() {
            return Err(TypesError::InvalidDocument("empty _id".into()));
        }
        if let Some(rev) = &self.rev {
            rev.parse::<Revision>()?;
        }
        Ok(())
    }
}

/// Revision history of a document (`_revisions`), newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revisions {
    /// Generation of the newest revision.
    pub start: u64,
    /// Revision hashes, newest first.
    pub ids: Vec<String>,
}

impl Revisions {
    /// Expand into full `N-hash` revision strings, newest first.
    pub fn rev_strings(&self) -> Vec<String> {
        self.ids
            .iter()
            .enumerate()
            .map(|(i, hash)| format!("{}-{}", self.start.saturating_sub(i as u64), hash))
            .collect()
    }

    /// The newest revision in this history.
    pub fn head(&self) -> Option<Revision> {
        self.ids
            .first()
            .map(|hash| Revision::new(self.start, hash.clone()))
    }
}

/// Per-document result of a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    /// Document id.
    pub id: String,
    /// Whether the write succeeded.
    #[serde(default)]
    pub ok: bool,
    /// New revision on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// Error kind on failure (e.g. `conflict`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Human readable failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl WriteResult {
    /// Successful write.
    pub fn success(id: impl Into<String>, rev: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ok: true,
            rev: Some(rev.into()),
            error: None,
            reason: None,
        }
    }

    /// Failed write.
    pub fn failure(id: impl Into<String>, error: &str, reason: &str) -> Self {
        Self {
            id: id.into(),
            ok: false,
            rev: None,
            error: Some(error.into()),
            reason: Some(reason.into()),
        }
    }

    /// Returns true if the write succeeded.
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.rev.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bench_document_has_random_fields() {
        let mut rng = rand::thread_rng();
        let doc = Document::bench("doc_0000000001", &mut rng);
        let foo = doc.get_f64("foo").unwrap();
        let bar = doc.get_f64("bar").unwrap();
        assert!((0.0..1.0).contains(&foo));
        assert!((0.0..1.0).contains(&bar));
        assert!(doc.rev.is_none());
    }

    #[test]
    fn serializes_reserved_fields() {
        let doc = Document::new("a").with_rev("1-abc").with_field("foo", 1.5);
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value, json!({"_id": "a", "_rev": "1-abc", "foo": 1.5}));
    }

    #[test]
    fn from_json_takes_id_from_path() {
        let body = json!({"_id": "other", "foo": 1}).as_object().unwrap().clone();
        let doc = Document::from_json("doc", body).unwrap();
        assert_eq!(doc.id, "doc");
        assert_eq!(doc.body.get("foo"), Some(&json!(1)));
        assert!(!doc.body.contains_key("_id"));
    }

    #[test]
    fn from_json_rejects_malformed_reserved_fields() {
        let body = json!({"_rev": 5}).as_object().unwrap().clone();
        let err = Document::from_json("doc", body).unwrap_err();
        assert!(matches!(err, TypesError::Json(_)));
    }

    #[test]
    fn deserializes_couch_json() {
        let doc: Document = serde_json::from_value(json!({
            "_id": "a",
            "_rev": "2-bbb",
            "_revisions": {"start": 2, "ids": ["bbb", "aaa"]},
            "foo": 0.25
        }))
        .unwrap();
        assert_eq!(doc.id, "a");
        assert_eq!(doc.revision().unwrap().unwrap().generation(), 2);
        assert_eq!(doc.get_f64("foo"), Some(0.25));
        assert!(!doc.body.contains_key("_rev"));
        let revisions = doc.revisions.unwrap();
        assert_eq!(revisions.rev_strings(), vec!["2-bbb", "1-aaa"]);
        assert_eq!(revisions.head().unwrap().to_string(), "2-bbb");
    }

    #[test]
    fn validate_rejects_bad_documents() {
        assert!(Document::new("").validate().is_err());
        assert!(Document::new("a").with_rev("nope").validate().is_err());
        assert!(Document::new("a").with_rev("1-x").validate().is_ok());
    }

    #[test]
    fn write_result_from_bulk_response() {
        let rows: Vec<WriteResult> = serde_json::from_value(json!([
            {"ok": true, "id": "a", "rev": "1-x"},
            {"id": "b", "error": "conflict", "reason": "Document update conflict."}
        ]))
        .unwrap();
        assert!(rows[0].is_ok());
        assert!(!rows[1].is_ok());
        assert_eq!(rows[1].error.as_deref(), Some("conflict"));
    }
}

//! In-toto v0.1 statement envelopes.
//!
//! See: <https://github.com/in-toto/attestation/blob/main/spec/v1.0/statement.md>
//! (the v0.1 `_type` is retained for compatibility with existing consumers).

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::io::Write;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::digest::Sha256Digest;
use crate::error::AttestError;
use crate::predicates::Predicate;

/// The canonical statement type URI.
pub const STATEMENT_TYPE: &str = "https://in-toto.io/Statement/v0.1";

/// A `{name, digest}` pair naming an object the statement predicates over.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subject {
    pub name: String,
    pub digest: Sha256Digest,
}

impl Subject {
    pub fn new(name: impl Into<String>, digest: Sha256Digest) -> Self {
        Self {
            name: name.into(),
            digest,
        }
    }
}

/// A typed provenance statement: a predicate plus the subjects it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    subjects: Vec<Subject>,
    predicate: Predicate,
}

impl Statement {
    /// Subjects are sorted by name on construction.
    pub fn new(predicate: Predicate, mut subjects: Vec<Subject>) -> Self {
        subjects.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            subjects,
            predicate,
        }
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn predicate_type(&self) -> &'static str {
        self.predicate.predicate_type()
    }

    pub fn subjects(&self) -> &[Subject] {
        &self.subjects
    }

    /// Rewrite every subject in place, stopping at the first error.
    pub fn visit_subjects(
        &mut self,
        mut visit: impl FnMut(&mut Subject) -> Result<(), AttestError>,
    ) -> Result<(), AttestError> {
        for subject in &mut self.subjects {
            visit(subject)?;
        }
        Ok(())
    }

    /// The exported in-toto envelope.
    pub fn export(&self) -> serde_json::Value {
        serde_json::json!({
            "_type": STATEMENT_TYPE,
            "predicateType": self.predicate.predicate_type(),
            "subject": self.subjects,
            "predicate": self.predicate.payload(),
        })
    }

    /// Write the envelope as a single line of JSON.
    pub fn encode(&self, writer: &mut dyn Write) -> Result<(), AttestError> {
        serde_json::to_writer(&mut *writer, &self.export())?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    /// Total order: predicate type, subject count, first subject name,
    /// then the predicate's structural comparison.
    pub fn compare(&self, other: &Statement) -> Ordering {
        self.predicate
            .predicate_type()
            .cmp(other.predicate.predicate_type())
            .then_with(|| self.subjects.len().cmp(&other.subjects.len()))
            .then_with(|| {
                let a = self.subjects.first().map(|s| s.name.as_str()).unwrap_or("");
                let b = other.subjects.first().map(|s| s.name.as_str()).unwrap_or("");
                a.cmp(b)
            })
            .then_with(|| self.predicate.compare(&other.predicate))
    }
}

/// Write statements as newline-delimited in-toto JSON.
pub fn encode_statements(
    statements: &[Statement],
    writer: &mut dyn Write,
) -> Result<(), AttestError> {
    for statement in statements {
        statement.encode(writer)?;
    }
    Ok(())
}

/// A compact description of a statement stream, attached to the artefact
/// as a base64(JSON) annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryAnnotation {
    #[serde(rename = "numStatements")]
    pub num_statements: usize,
    #[serde(rename = "predicateTypes")]
    pub predicate_types: Vec<String>,
    pub subjects: Vec<Subject>,
}

impl SummaryAnnotation {
    pub fn from_statements(statements: &[Statement]) -> Self {
        let mut types = BTreeSet::new();
        let mut subjects = BTreeSet::new();
        for statement in statements {
            types.insert(statement.predicate_type().to_owned());
            for subject in statement.subjects() {
                subjects.insert(subject.clone());
            }
        }
        let mut subjects: Vec<Subject> = subjects.into_iter().collect();
        subjects.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            num_statements: statements.len(),
            predicate_types: types.into_iter().collect(),
            subjects,
        }
    }

    pub fn marshal(&self) -> Result<String, AttestError> {
        let json = serde_json::to_vec(self)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(json))
    }

    pub fn unmarshal(encoded: &str) -> Result<Self, AttestError> {
        let json = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| AttestError::Summary(e.to_string()))?;
        Ok(serde_json::from_slice(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicates::ImageRefWithLocation;

    fn image_ref_statement(
        predicate: fn(ImageRefWithLocation) -> Predicate,
        reference: &str,
        subject: &str,
        line: usize,
    ) -> Statement {
        Statement::new(
            predicate(ImageRefWithLocation {
                reference: reference.to_owned(),
                line,
                column: 16,
                alias: None,
            }),
            vec![Subject::new(subject, Sha256Digest::of_bytes(subject.as_bytes()))],
        )
    }

    #[test]
    fn subjects_are_sorted_on_construction() {
        let statement = Statement::new(
            Predicate::OriginalImageRef(ImageRefWithLocation {
                reference: "nginx".to_owned(),
                line: 1,
                column: 1,
                alias: None,
            }),
            vec![
                Subject::new("b.yaml", Sha256Digest::of_bytes(b"b")),
                Subject::new("a.yaml", Sha256Digest::of_bytes(b"a")),
            ],
        );
        let names: Vec<&str> = statement.subjects().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a.yaml", "b.yaml"]);
    }

    #[test]
    fn export_shape() {
        let statement =
            image_ref_statement(Predicate::OriginalImageRef, "nginx:1.25", "app.yaml", 12);
        let envelope = statement.export();
        assert_eq!(envelope["_type"], STATEMENT_TYPE);
        assert_eq!(
            envelope["predicateType"],
            "docker.com/tape/OriginalImageRef/v0.1"
        );
        assert_eq!(envelope["subject"][0]["name"], "app.yaml");
        assert!(envelope["subject"][0]["digest"]["sha256"].is_string());
        assert_eq!(
            envelope["predicate"]["foundImageReference"]["reference"],
            "nginx:1.25"
        );
    }

    #[test]
    fn statements_order_by_type_then_subject_then_position() {
        let original =
            image_ref_statement(Predicate::OriginalImageRef, "nginx", "a.yaml", 3);
        let resolved =
            image_ref_statement(Predicate::ResolvedImageRef, "nginx", "a.yaml", 3);
        let later = image_ref_statement(Predicate::OriginalImageRef, "nginx", "a.yaml", 9);
        let other_file =
            image_ref_statement(Predicate::OriginalImageRef, "nginx", "b.yaml", 3);

        assert_eq!(original.compare(&resolved), Ordering::Less);
        assert_eq!(original.compare(&later), Ordering::Less);
        assert_eq!(original.compare(&other_file), Ordering::Less);
        assert_eq!(original.compare(&original.clone()), Ordering::Equal);
    }

    #[test]
    fn encoding_is_newline_delimited() {
        let statements = vec![
            image_ref_statement(Predicate::OriginalImageRef, "nginx", "a.yaml", 3),
            image_ref_statement(Predicate::ResolvedImageRef, "nginx", "a.yaml", 3),
        ];
        let mut buffer = Vec::new();
        encode_statements(&statements, &mut buffer).expect("encode");
        let text = String::from_utf8(buffer).expect("utf8");
        assert_eq!(text.lines().count(), 2);
        for line in text.lines() {
            let value: serde_json::Value = serde_json::from_str(line).expect("valid JSON line");
            assert_eq!(value["_type"], STATEMENT_TYPE);
        }
    }

    #[test]
    fn summary_annotation_round_trip() {
        let statements = vec![
            image_ref_statement(Predicate::OriginalImageRef, "nginx", "b.yaml", 3),
            image_ref_statement(Predicate::ResolvedImageRef, "nginx", "a.yaml", 3),
        ];
        let summary = SummaryAnnotation::from_statements(&statements);
        assert_eq!(summary.num_statements, 2);
        assert_eq!(summary.predicate_types.len(), 2);
        assert_eq!(summary.subjects[0].name, "a.yaml");

        let encoded = summary.marshal().expect("marshal");
        let decoded = SummaryAnnotation::unmarshal(&encoded).expect("unmarshal");
        assert_eq!(decoded, summary);
    }
}

//! The image-field walker.
//!
//! Streams YAML (or JSON, which the YAML parser accepts) events through
//! a path-tracking receiver and records every scalar sitting at one of
//! the recognised container-image node paths, with its 1-based line and
//! column. Documents whose `kind` is `CustomResourceDefinition` are
//! dropped wholesale.

use yaml_rust2::parser::{Event, MarkedEventReceiver, Parser};
use yaml_rust2::scanner::Marker;

/// Sequence marker inside a path pattern.
const SEQ: &str = "[]";

const CRD_KIND: &str = "CustomResourceDefinition";

/// Allow-list of node paths whose scalars are image references. The
/// `items[]/` forms cover one level of `kind: List` nesting.
const IMAGE_PATHS: &[&[&str]] = &[
    &["spec", "containers", SEQ, "image"],
    &["spec", "initContainers", SEQ, "image"],
    &["spec", "template", "spec", "containers", SEQ, "image"],
    &["spec", "template", "spec", "initContainers", SEQ, "image"],
    &["items", SEQ, "spec", "containers", SEQ, "image"],
    &["items", SEQ, "spec", "initContainers", SEQ, "image"],
    &["items", SEQ, "spec", "template", "spec", "containers", SEQ, "image"],
    &["items", SEQ, "spec", "template", "spec", "initContainers", SEQ, "image"],
];

/// A scalar matched by the allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalarMatch {
    pub value: String,
    /// 1-based line of the value.
    pub line: usize,
    /// 1-based column of the value.
    pub column: usize,
    /// Tree keys reaching the scalar, sequence markers dropped.
    pub node_path: Vec<String>,
}

enum Frame {
    Map { key: Option<String> },
    Seq,
}

#[derive(Default)]
struct Walker {
    stack: Vec<Frame>,
    document_matches: Vec<ScalarMatch>,
    matches: Vec<ScalarMatch>,
    document_kind: Option<String>,
}

impl Walker {
    fn current_path(&self) -> Vec<String> {
        self.stack
            .iter()
            .filter_map(|frame| match frame {
                Frame::Map { key: Some(key) } => Some(key.clone()),
                Frame::Map { key: None } => None,
                Frame::Seq => Some(SEQ.to_owned()),
            })
            .collect()
    }

    /// A container or scalar in value position completed; the owning
    /// mapping goes back to expecting a key.
    fn close_value(&mut self) {
        if let Some(Frame::Map { key }) = self.stack.last_mut() {
            *key = None;
        }
    }

    fn record(&mut self, path: &[String], value: String, marker: Marker) {
        if path.len() == 1 && path[0] == "kind" {
            self.document_kind = Some(value.clone());
        }
        let matched = IMAGE_PATHS.iter().any(|pattern| {
            pattern.len() == path.len()
                && pattern.iter().zip(path).all(|(a, b)| a == b)
        });
        if matched {
            self.document_matches.push(ScalarMatch {
                value,
                line: marker.line(),
                column: marker.col() + 1,
                node_path: path.iter().filter(|p| p.as_str() != SEQ).cloned().collect(),
            });
        }
    }
}

impl MarkedEventReceiver for Walker {
    fn on_event(&mut self, event: Event, marker: Marker) {
        match event {
            Event::DocumentStart => {
                self.stack.clear();
                self.document_matches.clear();
                self.document_kind = None;
            }
            Event::DocumentEnd => {
                if self.document_kind.as_deref() != Some(CRD_KIND) {
                    self.matches.append(&mut self.document_matches);
                } else {
                    self.document_matches.clear();
                }
            }
            Event::MappingStart(..) => {
                self.stack.push(Frame::Map { key: None });
            }
            Event::SequenceStart(..) => {
                self.stack.push(Frame::Seq);
            }
            Event::MappingEnd | Event::SequenceEnd => {
                self.stack.pop();
                self.close_value();
            }
            Event::Scalar(value, ..) => match self.stack.last() {
                Some(Frame::Map { key: None }) => {
                    if let Some(Frame::Map { key }) = self.stack.last_mut() {
                        *key = Some(value);
                    }
                }
                Some(Frame::Map { key: Some(_) }) => {
                    let path = self.current_path();
                    self.record(&path, value, marker);
                    self.close_value();
                }
                // bare sequence items and top-level scalars are never
                // image fields
                _ => {}
            },
            Event::Alias(..) => {
                self.close_value();
            }
            _ => {}
        }
    }
}

/// Walk all documents in `text` and return the matched image scalars in
/// document order.
pub fn scan_document_text(text: &str) -> Result<Vec<ScalarMatch>, String> {
    let mut parser = Parser::new_from_str(text);
    let mut walker = Walker::default();
    parser
        .load(&mut walker, true)
        .map_err(|e| e.to_string())?;
    Ok(walker.matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_deployment_containers() {
        let text = "\
apiVersion: apps/v1
kind: Deployment
spec:
  template:
    spec:
      containers:
      - name: app
        image: ghcr.io/fluxcd/kustomize-controller:v0.30.0
      - name: sidecar
        image: ghcr.io/fluxcd/source-controller:v0.31.0
";
        let matches = scan_document_text(text).expect("scan");
        assert_eq!(matches.len(), 2);
        assert_eq!(
            matches[0].value,
            "ghcr.io/fluxcd/kustomize-controller:v0.30.0"
        );
        assert_eq!(matches[0].line, 8);
        assert_eq!(matches[0].column, 16);
        assert_eq!(
            matches[0].node_path,
            vec!["spec", "template", "spec", "containers", "image"]
        );
        assert_eq!(matches[1].line, 10);
        assert_eq!(matches[1].column, 16);
    }

    #[test]
    fn matches_pod_and_init_containers() {
        let text = "\
kind: Pod
spec:
  initContainers:
  - image: busybox:1.36
  containers:
  - image: nginx
";
        let matches = scan_document_text(text).expect("scan");
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].value, "busybox:1.36");
        assert_eq!(
            matches[0].node_path,
            vec!["spec", "initContainers", "image"]
        );
        assert_eq!(matches[1].value, "nginx");
    }

    #[test]
    fn ignores_unrecognised_image_fields() {
        let text = "\
kind: ConfigMap
data:
  image: not-an-image-field
spec:
  jobTemplate:
    spec:
      containers:
      - image: also-not-matched
";
        let matches = scan_document_text(text).expect("scan");
        assert!(matches.is_empty());
    }

    #[test]
    fn skips_custom_resource_definitions() {
        let text = "\
kind: CustomResourceDefinition
spec:
  template:
    spec:
      containers:
      - image: should-be-skipped
---
kind: Deployment
spec:
  template:
    spec:
      containers:
      - image: kept:v1
";
        let matches = scan_document_text(text).expect("scan");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].value, "kept:v1");
    }

    #[test]
    fn matches_items_in_lists() {
        let text = "\
kind: List
items:
- kind: Pod
  spec:
    containers:
    - image: redis:7
";
        let matches = scan_document_text(text).expect("scan");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].value, "redis:7");
        assert_eq!(
            matches[0].node_path,
            vec!["items", "spec", "containers", "image"]
        );
    }

    #[test]
    fn parses_json_documents() {
        let text = r#"{
  "kind": "Pod",
  "spec": {
    "containers": [
      {"name": "app", "image": "nginx:1.16.1"}
    ]
  }
}
"#;
        let matches = scan_document_text(text).expect("scan");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].value, "nginx:1.16.1");
        assert_eq!(matches[0].line, 5);
    }

    #[test]
    fn multi_document_files() {
        let text = "\
kind: Pod
spec:
  containers:
  - image: first:v1
---
kind: Pod
spec:
  containers:
  - image: second:v2
";
        let matches = scan_document_text(text).expect("scan");
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].value, "first:v1");
        assert_eq!(matches[1].value, "second:v2");
    }

    #[test]
    fn rejects_invalid_yaml() {
        assert!(scan_document_text("kind: [unterminated").is_err());
    }
}

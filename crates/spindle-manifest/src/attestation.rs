//! Statement constructors over an [`ImageList`].
//!
//! Each image occurrence yields one statement whose subject is the
//! manifest file the reference was found in.

use spindle_attest::predicates::{ImageRefWithLocation, Predicate};
use spindle_attest::{Statement, Subject};

use crate::list::ImageList;

fn statements_for(
    images: &ImageList,
    make: fn(ImageRefWithLocation) -> Predicate,
) -> Vec<Statement> {
    let mut statements = Vec::new();
    for image in images.items() {
        for source in &image.sources {
            statements.push(Statement::new(
                make(ImageRefWithLocation {
                    reference: image.reference(true),
                    line: source.line,
                    column: source.column,
                    alias: image.alias.clone(),
                }),
                vec![Subject::new(
                    source.manifest.clone(),
                    source.manifest_digest.clone(),
                )],
            ));
        }
    }
    statements
}

/// `OriginalImageRef` statements for references as found by the scanner.
pub fn original_image_ref_statements(images: &ImageList) -> Vec<Statement> {
    statements_for(images, Predicate::OriginalImageRef)
}

/// `ResolvedImageRef` statements for references pinned to digests.
pub fn resolved_image_ref_statements(images: &ImageList) -> Vec<Statement> {
    statements_for(images, Predicate::ResolvedImageRef)
}

/// `ReplacedImageRef` statements for the rewritten references found by
/// the second scanner pass.
pub fn replaced_image_ref_statements(images: &ImageList) -> Vec<Statement> {
    statements_for(images, Predicate::ReplacedImageRef)
}

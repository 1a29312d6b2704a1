//! Schema contract verification
//!
//! Two pure visitors over [`SchemaDescriptor`]:
//! - [`matches`]: strict structural equality
//! - [`includes`]: directional structural inclusion
//!
//! Both run only at setup time. Leaf kinds are ignored here; a leaf is
//! compatible with any other leaf.

use crate::error::{Result, SetupError};
use crate::schema::SchemaDescriptor;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Strict structural equality. Symmetric and reflexive.
pub fn matches(a: &SchemaDescriptor, b: &SchemaDescriptor) -> bool {
    match (a, b) {
        (SchemaDescriptor::Leaf { .. }, SchemaDescriptor::Leaf { .. }) => true,
        (SchemaDescriptor::Object { fields: fa }, SchemaDescriptor::Object { fields: fb }) => {
            fa.len() == fb.len()
                && fa.iter().all(|(name, da)| match fb.get(name) {
                    Some(db) => matches(da, db),
                    None => false,
                })
        }
        (SchemaDescriptor::Array { element: ea }, SchemaDescriptor::Array { element: eb }) => {
            matches(ea, eb)
        }
        _ => false,
    }
}

/// Directional inclusion: every field of `inner` must exist in `outer` with an
/// included type. `outer` may carry extra fields.
pub fn includes(inner: &SchemaDescriptor, outer: &SchemaDescriptor) -> bool {
    match (inner, outer) {
        (SchemaDescriptor::Leaf { .. }, SchemaDescriptor::Leaf { .. }) => true,
        (SchemaDescriptor::Object { fields: fi }, SchemaDescriptor::Object { fields: fo }) => {
            fi.iter().all(|(name, di)| match fo.get(name) {
                Some(dout) => includes(di, dout),
                None => false,
            })
        }
        (SchemaDescriptor::Array { element: ei }, SchemaDescriptor::Array { element: eo }) => {
            includes(ei, eo)
        }
        _ => false,
    }
}

/// Relation applied at each stage boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractMode {
    /// Downstream input must be included in upstream output
    #[default]
    Include,
    /// Upstream output and downstream input must be structurally equal
    Match,
}

impl ContractMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractMode::Include => "include",
            ContractMode::Match => "match",
        }
    }

    /// Check whether `produced` satisfies `required` under this mode
    pub fn compatible(&self, produced: &SchemaDescriptor, required: &SchemaDescriptor) -> bool {
        match self {
            ContractMode::Include => includes(required, produced),
            ContractMode::Match => matches(produced, required),
        }
    }
}

/// One producer → consumer edge in a stage chain
#[derive(Debug, Clone)]
pub struct Boundary<'a> {
    pub upstream: String,
    pub produced: &'a SchemaDescriptor,
    pub downstream: String,
    pub required: &'a SchemaDescriptor,
}

impl<'a> Boundary<'a> {
    pub fn new(
        upstream: impl Into<String>,
        produced: &'a SchemaDescriptor,
        downstream: impl Into<String>,
        required: &'a SchemaDescriptor,
    ) -> Self {
        Self {
            upstream: upstream.into(),
            produced,
            downstream: downstream.into(),
            required,
        }
    }
}

/// Runs the configured relation across every boundary of a chain
#[derive(Debug, Clone, Copy, Default)]
pub struct ContractVerifier {
    mode: ContractMode,
}

impl ContractVerifier {
    pub fn new(mode: ContractMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ContractMode {
        self.mode
    }

    /// Verify all boundaries; the first incompatible one is a fatal error
    /// naming both stages.
    pub fn verify(&self, boundaries: &[Boundary<'_>]) -> Result<()> {
        for boundary in boundaries {
            debug!(
                "Verifying contract {} -> {} ({})",
                boundary.upstream,
                boundary.downstream,
                self.mode.as_str()
            );

            if !self.mode.compatible(boundary.produced, boundary.required) {
                return Err(SetupError::contract_violation(format!(
                    "output of {} does not satisfy input of {}",
                    boundary.upstream, boundary.downstream
                ))
                .line(format!("produced: {}", boundary.produced))
                .line(format!("required: {}", boundary.required))
                .line(format!(
                    "align the schemas ({} mode) or insert a pipe that reshapes the payload",
                    self.mode.as_str()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn obj(fields: &[&str]) -> SchemaDescriptor {
        SchemaDescriptor::object(fields.iter().map(|f| (*f, SchemaDescriptor::string())))
    }

    #[test]
    fn test_leaf_matches_any_leaf() {
        assert!(matches(
            &SchemaDescriptor::string(),
            &SchemaDescriptor::integer()
        ));
        assert!(includes(
            &SchemaDescriptor::boolean(),
            &SchemaDescriptor::any()
        ));
    }

    #[test]
    fn test_match_requires_same_field_set() {
        assert!(matches(&obj(&["x", "y"]), &obj(&["y", "x"])));
        assert!(!matches(&obj(&["x"]), &obj(&["x", "y"])));
        assert!(!matches(&obj(&["x", "z"]), &obj(&["x", "y"])));
    }

    #[test]
    fn test_include_is_directional() {
        assert!(includes(&obj(&["x"]), &obj(&["x", "y"])));
        assert!(!includes(&obj(&["x", "y"]), &obj(&["x"])));
    }

    #[test]
    fn test_mismatched_tags_are_incompatible() {
        let array = SchemaDescriptor::array(obj(&["x"]));
        assert!(!matches(&obj(&["x"]), &array));
        assert!(!includes(&obj(&["x"]), &array));
        assert!(!includes(&array, &obj(&["x"])));
        assert!(!includes(&SchemaDescriptor::string(), &obj(&[])));
    }

    #[test]
    fn test_include_recurses_into_arrays() {
        let narrow = SchemaDescriptor::array(obj(&["id"]));
        let wide = SchemaDescriptor::array(obj(&["id", "score"]));
        assert!(includes(&narrow, &wide));
        assert!(!includes(&wide, &narrow));
        assert!(!matches(&narrow, &wide));
    }

    #[test]
    fn test_mode_compatibility() {
        let produced = obj(&["x", "y"]);
        let required = obj(&["x"]);
        assert!(ContractMode::Include.compatible(&produced, &required));
        assert!(!ContractMode::Match.compatible(&produced, &required));
    }

    #[test]
    fn test_verifier_names_both_stages() {
        let produced = obj(&["title"]);
        let required = obj(&["title", "body"]);
        let boundaries = vec![Boundary::new(
            "crawler \"web\"",
            &produced,
            "indexer \"fts\"",
            &required,
        )];

        let err = ContractVerifier::default().verify(&boundaries).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SchemaContractViolation);
        assert!(err.lines[0].contains("crawler \"web\""));
        assert!(err.lines[0].contains("indexer \"fts\""));
    }

    #[test]
    fn test_verifier_accepts_compatible_chain() {
        let a = obj(&["x", "y"]);
        let b = obj(&["x"]);
        let boundaries = vec![Boundary::new("a", &a, "b", &b)];
        assert!(ContractVerifier::new(ContractMode::Include)
            .verify(&boundaries)
            .is_ok());
        assert!(ContractVerifier::new(ContractMode::Match)
            .verify(&boundaries)
            .is_err());
    }
}

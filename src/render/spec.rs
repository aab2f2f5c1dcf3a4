//! The template spec file model.
//!
//! `spec.yaml` at the template root declares the template's inputs and
//! the steps the render pipeline executes. The step set is deliberately
//! small; the orchestrator depends only on the pipeline's guarantees,
//! not on this vocabulary.

use serde::Deserialize;

use crate::tree::TemplateTree;

/// Filename of the template spec at the template root.
pub const SPEC_FILE_NAME: &str = "spec.yaml";

/// Spec format revisions this engine understands.
pub const SPEC_API_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateSpec {
    pub api_version: u32,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One declared template input.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputSpec {
    pub name: String,
    #[serde(default)]
    pub desc: String,
    /// Used only when the caller accepts defaults.
    #[serde(default)]
    pub default: Option<String>,
    /// Regex the resolved value must match, unless validation is skipped.
    #[serde(default)]
    pub rule: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", content = "params", rename_all = "snake_case")]
pub enum Step {
    Include(IncludeParams),
    StringReplace(StringReplaceParams),
    RegexReplace(RegexReplaceParams),
    Append(AppendParams),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncludeFrom {
    #[default]
    Template,
    /// Pull the file from the install destination: a modify-in-place
    /// step. The pipeline records a reversal patch for every such file
    /// it changes.
    Destination,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IncludeParams {
    /// Template-relative paths; `.` includes the whole tree.
    pub paths: Vec<String>,
    #[serde(default)]
    pub from: IncludeFrom,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StringReplaceParams {
    pub paths: Vec<String>,
    pub replacements: Vec<StringReplacement>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StringReplacement {
    pub to_replace: String,
    pub with: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegexReplaceParams {
    pub paths: Vec<String>,
    pub replacements: Vec<RegexReplacement>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegexReplacement {
    pub matches: String,
    pub with: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppendParams {
    pub paths: Vec<String>,
    pub with: String,
}

impl TemplateSpec {
    /// Parse the spec out of a loaded template tree.
    pub fn from_tree(tree: &TemplateTree) -> anyhow::Result<Self> {
        let entry = tree
            .get(SPEC_FILE_NAME)
            .ok_or_else(|| anyhow::anyhow!("template has no {SPEC_FILE_NAME}"))?;
        Self::parse(&entry.text())
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let spec: TemplateSpec = serde_yml::from_str(text)
            .map_err(|e| anyhow::anyhow!("invalid {SPEC_FILE_NAME}: {e}"))?;
        if spec.api_version != SPEC_API_VERSION {
            anyhow::bail!(
                "unsupported {SPEC_FILE_NAME} api_version {} (supported: {SPEC_API_VERSION})",
                spec.api_version
            );
        }
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_spec() {
        let text = r#"
api_version: 1
desc: demo template
inputs:
  - name: animal
    desc: what animal
    default: "cat"
    rule: "^[a-z]+$"
steps:
  - action: include
    params:
      paths: ["."]
  - action: include
    params:
      paths: ["hello.txt"]
      from: destination
  - action: string_replace
    params:
      paths: ["hello.txt"]
      replacements:
        - to_replace: "b"
          with: "X"
  - action: regex_replace
    params:
      paths: ["hello.txt"]
      replacements:
        - matches: "c+"
          with: "C"
  - action: append
    params:
      paths: ["hello.txt"]
      with: "trailer\n"
"#;
        let spec = TemplateSpec::parse(text).unwrap();
        assert_eq!(spec.inputs.len(), 1);
        assert_eq!(spec.inputs[0].default.as_deref(), Some("cat"));
        assert_eq!(spec.steps.len(), 5);
        match &spec.steps[1] {
            Step::Include(params) => assert_eq!(params.from, IncludeFrom::Destination),
            other => panic!("expected include step, got {other:?}"),
        }
    }

    #[test]
    fn include_defaults_to_template() {
        let text = "api_version: 1\nsteps:\n  - action: include\n    params:\n      paths: [\".\"]\n";
        let spec = TemplateSpec::parse(text).unwrap();
        match &spec.steps[0] {
            Step::Include(params) => assert_eq!(params.from, IncludeFrom::Template),
            other => panic!("expected include step, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_api_version() {
        let err = TemplateSpec::parse("api_version: 99\n").unwrap_err();
        assert!(err.to_string().contains("api_version"), "{err}");
    }

    #[test]
    fn rejects_unknown_step_action() {
        let text = "api_version: 1\nsteps:\n  - action: run_shell\n    params: {}\n";
        assert!(TemplateSpec::parse(text).is_err());
    }
}

//! Resolution of template input values.
//!
//! Precedence, strongest first: `--input` flags, `--input-file`, values
//! recorded in the manifest being upgraded, declared defaults (only with
//! `--accept-defaults`), interactive prompting (only with `--prompt`).
//! Names still unresolved after all of that fail with
//! [`UpgradeError::MissingInputs`] before anything is rendered.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;

use crate::cancel::CancelToken;
use crate::error::UpgradeError;
use crate::prompt::Prompter;
use crate::render::spec::InputSpec;

/// Non-interactive value sources plus resolution policy.
#[derive(Default)]
pub struct InputSources<'a> {
    pub flags: &'a [(String, String)],
    pub file: Option<&'a BTreeMap<String, String>>,
    pub recorded: Option<&'a BTreeMap<String, String>>,
    pub accept_defaults: bool,
    pub skip_validation: bool,
}

/// Resolve every declared input to a value.
///
/// `prompter` is `Some` only when the caller enabled prompting.
pub fn resolve(
    declared: &[InputSpec],
    sources: &InputSources<'_>,
    mut prompter: Option<&mut dyn Prompter>,
    cancel: &CancelToken,
) -> anyhow::Result<BTreeMap<String, String>> {
    warn_on_unknown(declared, sources);

    let mut values = BTreeMap::new();
    let mut missing = Vec::new();

    for input in declared {
        let flag_value = sources
            .flags
            .iter()
            .rev() // last occurrence of a repeated flag wins
            .find(|(name, _)| name == &input.name)
            .map(|(_, value)| value.clone());

        let value = flag_value
            .or_else(|| sources.file.and_then(|f| f.get(&input.name).cloned()))
            .or_else(|| sources.recorded.and_then(|r| r.get(&input.name).cloned()))
            .or_else(|| {
                if sources.accept_defaults {
                    input.default.clone()
                } else {
                    None
                }
            });

        let value = match value {
            Some(value) => value,
            None => match prompter.as_deref_mut() {
                Some(prompter) => {
                    cancel.check()?;
                    let message = if input.desc.is_empty() {
                        format!("{}\nEnter value", input.name)
                    } else {
                        format!("{} ({})\nEnter value", input.name, input.desc)
                    };
                    prompter.prompt(&message)?
                }
                None => {
                    missing.push(input.name.clone());
                    continue;
                }
            },
        };

        if !sources.skip_validation {
            validate(input, &value)?;
        }
        values.insert(input.name.clone(), value);
    }

    if !missing.is_empty() {
        return Err(UpgradeError::MissingInputs { names: missing }.into());
    }
    Ok(values)
}

fn validate(input: &InputSpec, value: &str) -> anyhow::Result<()> {
    let Some(rule) = &input.rule else {
        return Ok(());
    };
    let re = regex::Regex::new(rule)
        .with_context(|| format!("input {} has an invalid rule {rule:?}", input.name))?;
    if !re.is_match(value) {
        anyhow::bail!(
            "input {} value {value:?} does not match rule {rule:?}",
            input.name
        );
    }
    Ok(())
}

fn warn_on_unknown(declared: &[InputSpec], sources: &InputSources<'_>) {
    let known: Vec<&str> = declared.iter().map(|i| i.name.as_str()).collect();
    let supplied = sources
        .flags
        .iter()
        .map(|(name, _)| name.as_str())
        .chain(sources.file.into_iter().flat_map(|f| f.keys().map(String::as_str)));
    for name in supplied {
        if !known.contains(&name) {
            log::warn!("ignoring supplied input {name:?}: the template does not declare it");
        }
    }
}

/// Parse a `--input-file` YAML mapping of name to value.
pub fn parse_input_file(path: &Path) -> anyhow::Result<BTreeMap<String, String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file {}", path.display()))?;
    serde_yml::from_str(&text)
        .with_context(|| format!("input file {} is not a name: value mapping", path.display()))
}

/// Parse one `--input name=value` occurrence.
pub fn parse_input_flag(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("invalid input {raw:?}: expected name=value"))?;
    if name.is_empty() {
        return Err(format!("invalid input {raw:?}: name is empty"));
    }
    Ok((name.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::ScriptedPrompter;

    fn input(name: &str, default: Option<&str>, rule: Option<&str>) -> InputSpec {
        InputSpec {
            name: name.to_string(),
            desc: String::new(),
            default: default.map(str::to_string),
            rule: rule.map(str::to_string),
        }
    }

    #[test]
    fn flags_beat_file_and_recorded() {
        let declared = [input("animal", None, None)];
        let flags = vec![("animal".to_string(), "ferret".to_string())];
        let file = BTreeMap::from([("animal".to_string(), "cat".to_string())]);
        let recorded = BTreeMap::from([("animal".to_string(), "dog".to_string())]);

        let values = resolve(
            &declared,
            &InputSources {
                flags: &flags,
                file: Some(&file),
                recorded: Some(&recorded),
                ..Default::default()
            },
            None,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(values["animal"], "ferret");
    }

    #[test]
    fn repeated_flag_last_wins() {
        let declared = [input("animal", None, None)];
        let flags = vec![
            ("animal".to_string(), "cat".to_string()),
            ("animal".to_string(), "dog".to_string()),
        ];
        let values = resolve(
            &declared,
            &InputSources {
                flags: &flags,
                ..Default::default()
            },
            None,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(values["animal"], "dog");
    }

    #[test]
    fn defaults_require_opt_in() {
        let declared = [input("animal", Some("cat"), None)];

        let err = resolve(
            &declared,
            &InputSources::default(),
            None,
            &CancelToken::new(),
        )
        .unwrap_err();
        match err.downcast_ref::<UpgradeError>() {
            Some(UpgradeError::MissingInputs { names }) => {
                assert_eq!(names, &["animal".to_string()]);
            }
            other => panic!("expected MissingInputs, got {other:?}"),
        }

        let values = resolve(
            &declared,
            &InputSources {
                accept_defaults: true,
                ..Default::default()
            },
            None,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(values["animal"], "cat");
    }

    #[test]
    fn prompts_fill_remaining_values() {
        let declared = [input("animal", None, None)];
        let mut prompter = ScriptedPrompter::new(["alligator"]);

        let values = resolve(
            &declared,
            &InputSources::default(),
            Some(&mut prompter),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(values["animal"], "alligator");
        assert!(prompter.transcript[0].contains("Enter value"));
    }

    #[test]
    fn rule_validation_applies_unless_skipped() {
        let declared = [input("animal", None, Some("^[a-z]+$"))];
        let flags = vec![("animal".to_string(), "Not Lower".to_string())];

        let err = resolve(
            &declared,
            &InputSources {
                flags: &flags,
                ..Default::default()
            },
            None,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("does not match rule"), "{err}");

        let values = resolve(
            &declared,
            &InputSources {
                flags: &flags,
                skip_validation: true,
                ..Default::default()
            },
            None,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(values["animal"], "Not Lower");
    }

    #[test]
    fn parse_input_flag_shapes() {
        assert_eq!(
            parse_input_flag("a=b").unwrap(),
            ("a".to_string(), "b".to_string())
        );
        assert_eq!(
            parse_input_flag("a=b=c").unwrap(),
            ("a".to_string(), "b=c".to_string())
        );
        assert!(parse_input_flag("nope").is_err());
        assert!(parse_input_flag("=x").is_err());
    }

    #[test]
    fn cancelled_before_prompting() {
        let declared = [input("animal", None, None)];
        let mut prompter = ScriptedPrompter::new(["never used"]);
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = resolve(
            &declared,
            &InputSources::default(),
            Some(&mut prompter),
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpgradeError>(),
            Some(UpgradeError::Cancelled)
        ));
        assert!(prompter.transcript.is_empty());
    }
}

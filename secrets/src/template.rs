//! `${secret:NAME}` references inside manifests.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::{Result, bail};
use regex::{Captures, Regex};

static REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{secret:([A-Za-z0-9_.-]+)\}").expect("reference pattern")
});

// Anything opened with `${secret:`, terminated or not, whatever the name.
static OPENING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{secret:([^}]*)(\})?").expect("opening pattern"));

/// Distinct secret names referenced by `text`, in first-use order.
pub fn references(text: &str) -> Result<Vec<&str>> {
    check_well_formed(text)?;
    let mut names: Vec<&str> = Vec::new();
    for caps in REFERENCE_RE.captures_iter(text) {
        let Some(name) = caps.get(1).map(|m| m.as_str()) else {
            continue;
        };
        if !names.contains(&name) {
            names.push(name);
        }
    }
    Ok(names)
}

/// Replace every reference with its value. Every name must be present in `values`.
pub fn substitute(text: &str, values: &BTreeMap<String, String>) -> Result<String> {
    check_well_formed(text)?;
    let mut missing: Option<String> = None;
    let out = REFERENCE_RE.replace_all(text, |caps: &Captures| {
        let name = &caps[1];
        match values.get(name) {
            Some(value) => value.clone(),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });
    if let Some(name) = missing {
        bail!("no value for secret {name}");
    }
    Ok(out.into_owned())
}

fn check_well_formed(text: &str) -> Result<()> {
    for caps in OPENING_RE.captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if caps.get(2).is_none() {
            bail!("unterminated reference at byte {}", whole.start());
        }
        if !REFERENCE_RE.is_match(whole.as_str()) {
            bail!("invalid secret name {:?}", name.as_str());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_distinct_references_in_order() {
        let text = "user: ${secret:db_user}\npass: ${secret:db_pass}\nagain: ${secret:db_user}\n";
        assert_eq!(references(text).expect("refs"), vec!["db_user", "db_pass"]);
        assert!(references("plain: ${HOME}").expect("refs").is_empty());
    }

    #[test]
    fn rejects_malformed_references() {
        let err = references("a: ${secret:open").unwrap_err();
        assert_eq!(err.to_string(), "unterminated reference at byte 3");
        let err = references("a: ${secret:}").unwrap_err();
        assert_eq!(err.to_string(), "invalid secret name \"\"");
        let err = references("ok: ${secret:a}\nb: ${secret:has space}").unwrap_err();
        assert_eq!(err.to_string(), "invalid secret name \"has space\"");
    }

    #[test]
    fn substitutes_values() {
        let values = BTreeMap::from([("token".to_string(), "t0k".to_string())]);
        assert_eq!(
            substitute("auth: ${secret:token} # ${secret:token}", &values).expect("sub"),
            "auth: t0k # t0k"
        );
        let err = substitute("${secret:token} ${secret:other}", &values).unwrap_err();
        assert_eq!(err.to_string(), "no value for secret other");
        assert!(substitute("${secret:token", &values).is_err());
    }

    #[test]
    fn values_are_not_rescanned() {
        let values = BTreeMap::from([("outer".to_string(), "${secret:inner}".to_string())]);
        assert_eq!(
            substitute("x: ${secret:outer}", &values).expect("sub"),
            "x: ${secret:inner}"
        );
    }
}

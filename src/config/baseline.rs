//! Loading the rule files that drive the analysis engine.

use crate::error::{CapctlError, Result};
use crate::policy::{Baseline, DetectorConfig, NamingRules, Ruleset};
use std::fs;
use std::path::Path;

pub const DEFAULT_BASELINE_DIR: &str = "baseline";
pub const NAMING_RULES_FILE: &str = "naming-rules.yaml";
pub const COMPLIANCE_RULES_FILE: &str = "compliance-rules.yaml";
pub const CONFLICT_RULES_FILE: &str = "conflict-rules.yaml";
pub const BEST_PRACTICES_FILE: &str = "ms-best-practices.yaml";

/// Load the baseline directory. Naming, conflict and best-practice rules are optional;
/// compliance rules are required when `require_compliance` is set.
pub fn load(dir: &Path, require_compliance: bool) -> Result<Baseline> {
    let naming = match read_optional(&dir.join(NAMING_RULES_FILE))? {
        Some(contents) => serde_yaml::from_str::<NamingRules>(&contents)?,
        None => NamingRules::default(),
    };

    let compliance_path = dir.join(COMPLIANCE_RULES_FILE);
    let compliance = match read_optional(&compliance_path)? {
        Some(contents) => Ruleset::from_yaml(&contents)?,
        None if require_compliance => {
            return Err(CapctlError::ConfigError(format!(
                "Compliance rules not found at {}",
                compliance_path.display()
            )));
        }
        None => Ruleset::default(),
    };

    let conflicts = match read_optional(&dir.join(CONFLICT_RULES_FILE))? {
        Some(contents) => DetectorConfig::from_yaml(&contents)?,
        None => DetectorConfig::default(),
    };

    let best_practices = match read_optional(&dir.join(BEST_PRACTICES_FILE))? {
        Some(contents) => Ruleset::from_yaml(&contents)?,
        None => Ruleset::default(),
    };

    tracing::debug!(
        path = %dir.display(),
        rules = compliance.rules().len(),
        advisories = best_practices.rules().len(),
        "baseline loaded"
    );

    Ok(Baseline {
        naming,
        compliance,
        conflicts,
        best_practices,
    })
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(fs::read_to_string(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_compliance_rules() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            load(dir.path(), true),
            Err(CapctlError::ConfigError(_))
        ));
        let baseline = load(dir.path(), false).unwrap();
        assert!(baseline.compliance.is_empty());
    }

    #[test]
    fn test_invalid_ruleset_surfaces_ruleset_error() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(COMPLIANCE_RULES_FILE),
            "rules:\n  - { id: R1, severity: high, message: x, predicate: { kind: require-exclude-group } }\n",
        )
        .unwrap();
        assert!(matches!(
            load(dir.path(), true),
            Err(CapctlError::Ruleset(_))
        ));
    }

    #[test]
    fn test_naming_allow_lists() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(NAMING_RULES_FILE),
            "scopes: [allusers, admins]\ncontrols: [mfa]\n",
        )
        .unwrap();
        let baseline = load(dir.path(), false).unwrap();
        assert!(baseline.naming.scopes.contains("admins"));
        assert_eq!(baseline.naming.controls.len(), 1);
    }

    #[test]
    fn test_best_practices_loaded_when_present() {
        let dir = TempDir::new().unwrap();
        assert!(load(dir.path(), false).unwrap().best_practices.is_empty());

        fs::write(
            dir.path().join(BEST_PRACTICES_FILE),
            "rules:\n  - { id: BP005, severity: medium, message: x, predicate: { kind: require-any-exclusion } }\n",
        )
        .unwrap();
        let baseline = load(dir.path(), false).unwrap();
        assert_eq!(baseline.best_practices.rules().len(), 1);
        assert_eq!(baseline.best_practices.rules()[0].id, "BP005");
    }
}

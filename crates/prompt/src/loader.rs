//! Loader for the prompt set file (`.hrdesk/prompts.yaml`).

use crate::builder::check_template;
use crate::types::PromptSet;
use hrdesk_core::{AppError, AppResult};
use std::path::Path;

/// Load the prompt set from a YAML file.
///
/// A missing file yields the built-in prompt set. A file that exists but
/// fails to parse or validate is a prompt (configuration) error.
///
/// # Example
/// ```no_run
/// use hrdesk_prompt::load_prompts;
/// use std::path::Path;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let prompts = load_prompts(Path::new(".hrdesk/prompts.yaml"))?;
/// println!("{} route templates", prompts.routes.len());
/// # Ok(())
/// # }
/// ```
pub fn load_prompts(path: &Path) -> AppResult<PromptSet> {
    if !path.exists() {
        tracing::debug!("No prompt file at {:?}, using built-in prompts", path);
        return Ok(PromptSet::default());
    }

    tracing::debug!("Loading prompts from: {:?}", path);

    let contents = std::fs::read_to_string(path)
        .map_err(|e| AppError::Prompt(format!("Failed to read prompt file {:?}: {}", path, e)))?;

    let prompts: PromptSet = serde_yaml::from_str(&contents)
        .map_err(|e| AppError::Prompt(format!("Failed to parse prompt YAML {:?}: {}", path, e)))?;

    validate_prompts(&prompts)?;

    tracing::info!("Loaded {} route templates from {:?}", prompts.routes.len(), path);

    Ok(prompts)
}

/// Check that every configured route has an answer template.
pub fn ensure_route_templates(prompts: &PromptSet, routes: &[String]) -> AppResult<()> {
    let missing: Vec<&str> = routes
        .iter()
        .filter(|route| prompts.route_template(route).is_none())
        .map(String::as_str)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::Config(format!(
            "No prompt template for route(s): {}",
            missing.join(", ")
        )))
    }
}

/// Validate a prompt set.
fn validate_prompts(prompts: &PromptSet) -> AppResult<()> {
    if prompts.router.system.trim().is_empty() || prompts.router.user.trim().is_empty() {
        return Err(AppError::Prompt(
            "Router system and user prompts cannot be empty".to_string(),
        ));
    }

    check_template("router.system", &prompts.router.system)?;
    check_template("router.user", &prompts.router.user)?;

    for (route, template) in &prompts.routes {
        if template.trim().is_empty() {
            return Err(AppError::Prompt(format!(
                "Template for route '{}' cannot be empty",
                route
            )));
        }
        check_template(route, template)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_prompts(dir: &TempDir, content: &str) -> std::path::PathBuf {
        let path = dir.path().join("prompts.yaml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_valid_prompts() {
        let dir = TempDir::new().unwrap();
        let path = write_prompts(
            &dir,
            r#"
router:
  system: "Classify. Role {{role}}"
  user: "{{question}}"
routes:
  hr_policy: "Policy: {{question}}\n{{context}}"
  payroll: "Payroll: {{question}}"
"#,
        );

        let prompts = load_prompts(&path).unwrap();
        assert_eq!(prompts.routes.len(), 2);
        assert_eq!(prompts.route_template("payroll"), Some("Payroll: {{question}}"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let prompts = load_prompts(&dir.path().join("prompts.yaml")).unwrap();
        assert_eq!(prompts, PromptSet::default());
    }

    #[test]
    fn test_invalid_yaml() {
        let dir = TempDir::new().unwrap();
        let path = write_prompts(&dir, "routes: [unclosed");
        assert!(load_prompts(&path).unwrap_err().is_config());
    }

    #[test]
    fn test_empty_route_template_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_prompts(&dir, "routes:\n  hr_policy: \"  \"\n");
        assert!(load_prompts(&path).is_err());
    }

    #[test]
    fn test_ensure_route_templates() {
        let prompts = PromptSet::default();
        assert!(ensure_route_templates(&prompts, &["hr_policy".to_string()]).is_ok());

        let err = ensure_route_templates(
            &prompts,
            &["hr_policy".to_string(), "benefits".to_string()],
        )
        .unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("benefits"));
    }
}

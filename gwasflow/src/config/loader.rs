//! Configuration file loading.

use super::PipelineConfig;
use crate::errors::ConfigurationError;
use std::path::Path;

/// Reads, parses and validates a TOML configuration file.
///
/// # Errors
///
/// Returns `ConfigurationError::Load` for read/parse failures and the
/// specific validation error otherwise.
pub fn load(path: &Path) -> Result<PipelineConfig, ConfigurationError> {
    let contents = std::fs::read_to_string(path).map_err(|err| ConfigurationError::Load {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    let config: PipelineConfig =
        toml::from_str(&contents).map_err(|err| ConfigurationError::Load {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gwasflow.toml");
        std::fs::write(
            &path,
            r#"
                [working_files]
                project_name = "kidney_gwas"
                projects_dir = "/data/projects"

                [pipeline]
                procs = 8
                end = ["task1"]

                [stages.task1]
                command = "echo done > {output}"
                outputs = ["done.txt"]
            "#,
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.pipeline.procs, 8);
        assert_eq!(config.pipeline.end, ["task1"]);
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let err = load(Path::new("/nonexistent/gwasflow.toml")).unwrap_err();
        assert!(matches!(err, ConfigurationError::Load { .. }));
    }

    #[test]
    fn parse_failure_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "this is not toml [").unwrap();

        let err = load(&path).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn invalid_options_fail_after_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gwasflow.toml");
        std::fs::write(
            &path,
            r#"
                [working_files]
                project_name = "p"
                projects_dir = "/tmp"

                [pipeline]
                procs = 0

                [stages.task1]
                command = "true"
            "#,
        )
        .unwrap();

        let err = load(&path).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidOption { ref option, .. } if option == "procs"));
    }
}

//! Checks for the external tools the cluster commands shell out to

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrereqError {
    #[error("Tool '{name}' not found")]
    NotFound { name: String, hint: String },
}

pub trait Prerequisite {
    fn name(&self) -> &str;

    fn check(&self) -> Result<(), PrereqError>;

    fn install_hint(&self) -> &str;
}

/// Prerequisite satisfied when a command is on `PATH`
pub struct CommandPrereq {
    pub name: String,
    pub hint: String,
}

impl CommandPrereq {
    pub fn new(name: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hint: hint.into(),
        }
    }
}

impl Prerequisite for CommandPrereq {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self) -> Result<(), PrereqError> {
        which::which(&self.name).map_err(|_| PrereqError::NotFound {
            name: self.name.clone(),
            hint: self.hint.clone(),
        })?;
        Ok(())
    }

    fn install_hint(&self) -> &str {
        &self.hint
    }
}

pub struct CommonPrereqs;

impl CommonPrereqs {
    pub fn kind() -> CommandPrereq {
        CommandPrereq::new(
            "kind",
            "Install from: https://kind.sigs.k8s.io/docs/user/quick-start/#installation",
        )
    }

    pub fn kubectl() -> CommandPrereq {
        CommandPrereq::new(
            "kubectl",
            "Install from: https://kubernetes.io/docs/tasks/tools/",
        )
    }

    pub fn docker() -> CommandPrereq {
        CommandPrereq::new("docker", "Install from: https://docs.docker.com/get-docker/")
    }

    /// Everything `cluster` subcommands need
    pub fn cluster_tools() -> Vec<CommandPrereq> {
        vec![Self::kind(), Self::kubectl(), Self::docker()]
    }

    /// Returns (found, missing with install hints)
    pub fn check_all(prereqs: &[&dyn Prerequisite]) -> (Vec<String>, Vec<(String, String)>) {
        let mut found = Vec::new();
        let mut missing = Vec::new();

        for prereq in prereqs {
            match prereq.check() {
                Ok(()) => found.push(prereq.name().to_string()),
                Err(PrereqError::NotFound { name, hint }) => missing.push((name, hint)),
            }
        }

        (found, missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prereq_trait() {
        let prereq = CommandPrereq::new("sh", "Should always exist");
        assert_eq!(prereq.name(), "sh");
        assert!(prereq.check().is_ok());
    }

    #[test]
    fn test_missing_prereq() {
        let prereq = CommandPrereq::new("nonexistent-tool-xyz", "Test hint");
        assert!(prereq.check().is_err());
        assert_eq!(prereq.install_hint(), "Test hint");
    }

    #[test]
    fn test_check_all_splits_results() {
        let present = CommandPrereq::new("sh", "n/a");
        let absent = CommandPrereq::new("nonexistent-tool-xyz", "get it");
        let (found, missing) = CommonPrereqs::check_all(&[&present, &absent]);
        assert_eq!(found, vec!["sh".to_string()]);
        assert_eq!(missing, vec![("nonexistent-tool-xyz".to_string(), "get it".to_string())]);
    }

    #[test]
    fn test_cluster_tools() {
        let names: Vec<String> = CommonPrereqs::cluster_tools()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(names, ["kind", "kubectl", "docker"]);
    }
}

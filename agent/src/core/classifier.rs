//! Deterministic classification of tree changes into processable artifacts.

use std::path::Path;

use crate::core::changes::{Change, ChangeAction};
use crate::core::types::{ArtifactKind, ArtifactRef};

/// Suffix that marks a shell script.
pub const SHELL_SUFFIX: &str = ".sh";

/// Recognized container definition basenames.
pub const CONTAINER_FILE_NAMES: [&str; 2] = ["Dockerfile", "Containerfile"];

/// Prefix namespacing container identifiers in the shared status store.
pub const CONTAINER_ID_PREFIX: &str = "container:";

/// Which classifiers are active and how container paths are recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierRules {
    pub shell: bool,
    pub container: bool,
    /// Top-level directory holding one subdirectory per container.
    pub container_dir: String,
}

/// A change qualifies as a shell artifact only when it inserts a `.sh` path.
///
/// Modified scripts are intentionally not reprocessed.
pub fn is_new_shell_script(change: &Change) -> bool {
    change.action == ChangeAction::Insert && change.path.ends_with(SHELL_SUFFIX)
}

/// Return the container name when the change inserts or modifies
/// `<container_dir>/<name>/<Dockerfile|Containerfile>`.
pub fn container_name<'a>(change: &'a Change, container_dir: &str) -> Option<&'a str> {
    if !matches!(change.action, ChangeAction::Insert | ChangeAction::Modify) {
        return None;
    }
    let mut parts = change.path.split('/');
    let (Some(top), Some(name), Some(file), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };
    if !top.eq_ignore_ascii_case(container_dir) || name.is_empty() {
        return None;
    }
    if !CONTAINER_FILE_NAMES.contains(&file) {
        return None;
    }
    Some(name)
}

/// Select the artifacts to process from a diff, preserving diff order.
pub fn plan_artifacts(changes: &[Change], rules: &ClassifierRules) -> Vec<ArtifactRef> {
    let mut planned = Vec::new();
    for change in changes {
        if rules.shell && is_new_shell_script(change) {
            planned.push(ArtifactRef {
                kind: ArtifactKind::Shell,
                identifier: change.path.clone(),
                path: change.path.clone(),
                name: file_name(&change.path),
            });
            continue;
        }
        if rules.container
            && let Some(name) = container_name(change, &rules.container_dir)
        {
            planned.push(ArtifactRef {
                kind: ArtifactKind::Container,
                identifier: format!("{CONTAINER_ID_PREFIX}{name}"),
                path: change.path.clone(),
                name: name.to_string(),
            });
        }
    }
    planned
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> ClassifierRules {
        ClassifierRules {
            shell: true,
            container: true,
            container_dir: "Containers".to_string(),
        }
    }

    #[test]
    fn inserted_script_qualifies() {
        assert!(is_new_shell_script(&Change::new(
            ChangeAction::Insert,
            "scripts/deploy.sh"
        )));
    }

    #[test]
    fn modified_script_does_not_qualify() {
        assert!(!is_new_shell_script(&Change::new(
            ChangeAction::Modify,
            "deploy.sh"
        )));
    }

    #[test]
    fn non_script_insert_does_not_qualify() {
        assert!(!is_new_shell_script(&Change::new(
            ChangeAction::Insert,
            "deploy.sh.txt"
        )));
    }

    #[test]
    fn container_insert_and_modify_qualify() {
        let insert = Change::new(ChangeAction::Insert, "Containers/webapp/Dockerfile");
        let modify = Change::new(ChangeAction::Modify, "containers/api/Containerfile");
        assert_eq!(container_name(&insert, "Containers"), Some("webapp"));
        assert_eq!(container_name(&modify, "Containers"), Some("api"));
    }

    #[test]
    fn container_delete_and_rename_never_qualify() {
        let delete = Change::new(ChangeAction::Delete, "Containers/webapp/Dockerfile");
        let rename = Change {
            action: ChangeAction::Rename,
            path: "Containers/webapp/Dockerfile".to_string(),
            from: Some("Containers/old/Dockerfile".to_string()),
        };
        assert_eq!(container_name(&delete, "Containers"), None);
        assert_eq!(container_name(&rename, "Containers"), None);
    }

    #[test]
    fn container_requires_exact_layout_and_basename() {
        for path in [
            "Containers/Dockerfile",
            "Containers/web/nested/Dockerfile",
            "Containers/web/Dockerfile.dev",
            "Other/web/Dockerfile",
            "src/Containers/web/Dockerfile",
        ] {
            let change = Change::new(ChangeAction::Insert, path);
            assert_eq!(container_name(&change, "Containers"), None, "{path}");
        }
    }

    #[test]
    fn plan_namespaces_container_identifiers() {
        let changes = vec![
            Change::new(ChangeAction::Insert, "deploy.sh"),
            Change::new(ChangeAction::Modify, "deploy.sh"),
            Change::new(ChangeAction::Modify, "Containers/webapp/Dockerfile"),
            Change::new(ChangeAction::Insert, "README.md"),
        ];
        let planned = plan_artifacts(&changes, &rules());
        let ids: Vec<&str> = planned.iter().map(|a| a.identifier.as_str()).collect();
        assert_eq!(ids, vec!["deploy.sh", "container:webapp"]);
        assert_eq!(planned[1].name, "webapp");
        assert_eq!(planned[1].path, "Containers/webapp/Dockerfile");
    }

    #[test]
    fn disabled_classifiers_plan_nothing() {
        let changes = vec![
            Change::new(ChangeAction::Insert, "deploy.sh"),
            Change::new(ChangeAction::Insert, "Containers/webapp/Dockerfile"),
        ];
        let rules = ClassifierRules {
            shell: false,
            container: false,
            ..rules()
        };
        assert!(plan_artifacts(&changes, &rules).is_empty());
    }
}

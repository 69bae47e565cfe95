// Project descriptor (forge.yaml) and artifact path layout

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Project descriptor parsed from forge.yaml at the database root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDescriptor {
    pub name: String,
}

/// Load forge.yaml if present; a missing descriptor defaults the project
/// name to the root directory name.
pub fn load_descriptor(root: &Path) -> Result<ProjectDescriptor> {
    let path = root.join("forge.yaml");
    if path.exists() {
        let content = std::fs::read_to_string(&path)?;
        let descriptor: ProjectDescriptor = serde_yaml::from_str(&content)?;
        return Ok(descriptor);
    }
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "game".to_string());
    Ok(ProjectDescriptor { name })
}

/// Output artifact locations for one export run.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPaths {
    pub snapshot: PathBuf,
    pub live: PathBuf,
    pub manifest: PathBuf,
}

/// Resolve artifact paths: `build/data.fdb` under the root by default,
/// with the live delta and manifest always siblings of the snapshot so a
/// `--bin` override moves all three together.
pub fn artifact_paths(root: &Path, bin_override: Option<&Path>) -> ArtifactPaths {
    let snapshot = match bin_override {
        Some(bin) => bin.to_path_buf(),
        None => root.join("build").join("data.fdb"),
    };
    let stem = snapshot
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "data".to_string());
    let dir = snapshot
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    ArtifactPaths {
        live: dir.join(format!("{stem}.live.fdb")),
        manifest: dir.join(format!("{stem}.manifest.json")),
        snapshot,
    }
}

const STARTER_SCHEMA: &str = "\
# Table schema declarations. Example:
#
# tables:
#   Item:
#     version: 1
#     fields:
#       - { name: Id, type: int, key: primary }
#       - { name: Category, type: string, key: secondary, index: 0 }
tables: {}
";

/// Scaffold an empty database root: forge.yaml, a starter schema.yaml,
/// and the data/ directory. Idempotent — files that already exist are
/// left untouched.
pub fn init_game(root: &Path, name: Option<&str>) -> Result<()> {
    std::fs::create_dir_all(root.join("data"))?;

    let descriptor_path = root.join("forge.yaml");
    if !descriptor_path.exists() {
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| {
                root.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "game".to_string())
            });
        let descriptor = ProjectDescriptor { name };
        std::fs::write(&descriptor_path, serde_yaml::to_string(&descriptor)?)?;
    }

    let schema_path = root.join("schema.yaml");
    if !schema_path.exists() {
        std::fs::write(&schema_path, STARTER_SCHEMA)?;
    }

    log::info!("initialized database root at {}", root.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        init_game(dir.path(), Some("my-game")).unwrap();

        let descriptor = load_descriptor(dir.path()).unwrap();
        assert_eq!(descriptor.name, "my-game");

        // Hand-edit, then re-init: nothing is overwritten.
        std::fs::write(dir.path().join("forge.yaml"), "name: edited\n").unwrap();
        init_game(dir.path(), Some("other")).unwrap();
        assert_eq!(load_descriptor(dir.path()).unwrap().name, "edited");
        assert!(dir.path().join("schema.yaml").exists());
        assert!(dir.path().join("data").is_dir());
    }

    #[test]
    fn test_missing_descriptor_defaults_to_directory_name() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("dungeon");
        std::fs::create_dir_all(&root).unwrap();
        assert_eq!(load_descriptor(&root).unwrap().name, "dungeon");
    }

    #[test]
    fn test_artifact_paths_follow_bin_override() {
        let root = Path::new("/tmp/game");
        let default = artifact_paths(root, None);
        assert_eq!(default.snapshot, root.join("build/data.fdb"));
        assert_eq!(default.live, root.join("build/data.live.fdb"));
        assert_eq!(default.manifest, root.join("build/data.manifest.json"));

        let custom = artifact_paths(root, Some(Path::new("/out/game.fdb")));
        assert_eq!(custom.snapshot, Path::new("/out/game.fdb"));
        assert_eq!(custom.live, Path::new("/out/game.live.fdb"));
        assert_eq!(custom.manifest, Path::new("/out/game.manifest.json"));
    }
}

use std::path::{Path, PathBuf};

use crate::{
    chunking::ChunkPolicy,
    error::{Error, Result},
};

pub const WORK_DIR_ENV_VAR: &str = "DOCGATE_WORK_DIR";

/// Layout of a feature store work directory:
///
/// ```text
/// <root>/
///   preprocess/    copied source files, one per base name
///   db_response/   response index
///   db_reject/     reject index
///   positive.txt   accepted sample questions
///   negative.txt   rejected sample questions
/// ```
#[derive(Debug, Clone)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    /// Resolve the work directory from, in order of priority:
    /// 1. An explicit path (from --work_dir)
    /// 2. The DOCGATE_WORK_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/docgate/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var(WORK_DIR_ENV_VAR) {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("docgate")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn preprocess_dir(&self) -> PathBuf {
        self.root.join("preprocess")
    }

    pub fn index_dir(&self, policy: ChunkPolicy) -> PathBuf {
        self.root.join(policy.index_name())
    }

    pub fn positive_samples(&self) -> PathBuf {
        self.root.join("positive.txt")
    }

    pub fn negative_samples(&self) -> PathBuf {
        self.root.join("negative.txt")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_with_explicit_path() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = WorkDir::resolve(Some(tmp.path())).unwrap();

        assert_eq!(dir.root(), tmp.path());
        assert_eq!(dir.preprocess_dir(), tmp.path().join("preprocess"));
        assert_eq!(
            dir.index_dir(ChunkPolicy::Response),
            tmp.path().join("db_response")
        );
        assert_eq!(
            dir.index_dir(ChunkPolicy::Reject),
            tmp.path().join("db_reject")
        );
    }

    #[test]
    fn missing_root_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("workdir");
        let dir = WorkDir::resolve(Some(&nested)).unwrap();
        assert!(dir.root().is_dir());
    }
}

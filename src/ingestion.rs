use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;

use crate::{
    chunking::{Chunk, ChunkPolicy, Document, chunk_document},
    error::{Error, Result},
    extractor::{Extractor, FileType},
};

/// Outcome counts of a preprocess run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreprocessReport {
    /// Files copied into the preprocess directory.
    pub success: usize,
    /// Files that could not be classified or copied.
    pub fail: usize,
    /// Unsupported or excluded files.
    pub skip: usize,
    /// Images, kept out until an OCR extractor exists.
    pub deferred: usize,
}

/// Compile `exclude` glob patterns into one matcher.
pub fn exclude_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            Error::Config(format!("invalid exclude pattern {pattern:?}: {e}"))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("invalid exclude patterns: {e}")))
}

/// Copy every ingestible file into `target`, flattened by base name.
///
/// `target` is recreated from scratch. When two inputs share a base name the
/// later one replaces the earlier.
pub fn preprocess(
    files: &[PathBuf],
    target: &Path,
    extractor: &dyn Extractor,
    exclude: &GlobSet,
) -> Result<PreprocessReport> {
    if target.exists() {
        tracing::warn!(
            dir = %target.display(),
            "preprocess directory already exists, removing and regenerating"
        );
        std::fs::remove_dir_all(target)?;
    }
    std::fs::create_dir_all(target)?;

    let mut report = PreprocessReport::default();

    for path in files {
        if exclude.is_match(path) {
            tracing::info!(path = %path.display(), "skip excluded file");
            report.skip += 1;
            continue;
        }

        let file_type = extractor.file_type(path);
        if file_type == FileType::Image {
            tracing::debug!(path = %path.display(), "deferring image");
            report.deferred += 1;
            continue;
        }
        if !file_type.is_ingestible() {
            tracing::info!(path = %path.display(), "skip unsupported file");
            report.skip += 1;
            continue;
        }

        let Some(name) = path.file_name() else {
            tracing::error!(path = %path.display(), "file has no base name");
            report.fail += 1;
            continue;
        };
        let dest = target.join(name);
        if dest.exists() {
            tracing::warn!(
                path = %path.display(),
                dest = %dest.display(),
                "duplicate base name, replacing earlier file"
            );
        }
        match std::fs::copy(path, &dest) {
            Ok(_) => report.success += 1,
            Err(e) => {
                tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "copy failed"
                );
                report.fail += 1;
            }
        }
    }

    tracing::debug!(
        input = files.len(),
        success = report.success,
        fail = report.fail,
        skip = report.skip,
        deferred = report.deferred,
        "preprocess finished"
    );
    Ok(report)
}

/// Extracted documents of one preprocess directory.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    pub documents: Vec<Document>,
    /// Files whose text could not be extracted.
    pub unreadable: usize,
}

/// Regular files directly under `dir`, sorted, hidden names included.
///
/// The preprocess directory is flat and holds exactly what [`preprocess`]
/// copied, so every entry counts.
fn preprocessed_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let dir = dir.canonicalize()?;
    let mut files = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Read every file of the preprocess directory once.
///
/// Files are extracted in parallel; documents keep the sorted file order.
/// Extraction failures are logged and counted, not returned.
pub fn load_corpus(dir: &Path, extractor: &dyn Extractor) -> Result<Corpus> {
    let files = preprocessed_files(dir)?;

    let results: Vec<Option<Document>> = files
        .par_iter()
        .map(|path| {
            let file_type = extractor.file_type(path);
            match extractor.read(path) {
                Ok(content) => {
                    tracing::debug!(
                        path = %path.display(),
                        %file_type,
                        "extracted"
                    );
                    Some(Document::new(content, path.clone(), file_type))
                }
                Err(e) => {
                    tracing::error!(
                        path = %path.display(),
                        error = %e,
                        "extraction failed"
                    );
                    None
                }
            }
        })
        .collect();

    let total = results.len();
    let documents: Vec<Document> = results.into_iter().flatten().collect();
    let unreadable = total - documents.len();
    tracing::info!(documents = documents.len(), unreadable, "loaded corpus");

    Ok(Corpus {
        documents,
        unreadable,
    })
}

/// Chunk every document for one index, preserving document order.
pub fn chunk_corpus(policy: ChunkPolicy, documents: &[Document]) -> Vec<Chunk> {
    documents
        .par_iter()
        .map(|document| chunk_document(policy, document))
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::FileOperation;

    fn no_excludes() -> GlobSet {
        exclude_set(&[]).unwrap()
    }

    #[test]
    fn preprocess_copies_supported_files() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let files: Vec<PathBuf> = ["a.md", "b.txt", "c.pdf", "d.png", "e.rs"]
            .iter()
            .map(|name| {
                let path = repo.path().join(name);
                std::fs::write(&path, "content").unwrap();
                path
            })
            .collect();

        let target = work.path().join("preprocess");
        let report =
            preprocess(&files, &target, &FileOperation, &no_excludes())
                .unwrap();

        assert_eq!(
            report,
            PreprocessReport {
                success: 3,
                fail: 0,
                skip: 1,
                deferred: 1,
            }
        );
        assert!(target.join("a.md").is_file());
        assert!(target.join("c.pdf").is_file());
        assert!(!target.join("d.png").exists());
        assert!(!target.join("e.rs").exists());
    }

    #[test]
    fn preprocess_recreates_target() {
        let work = tempfile::tempdir().unwrap();
        let target = work.path().join("preprocess");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("stale.md"), "old").unwrap();

        let report =
            preprocess(&[], &target, &FileOperation, &no_excludes()).unwrap();
        assert_eq!(report, PreprocessReport::default());
        assert!(target.is_dir());
        assert!(!target.join("stale.md").exists());
    }

    #[test]
    fn duplicate_base_names_keep_the_last() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        for dir in ["one", "two"] {
            std::fs::create_dir(repo.path().join(dir)).unwrap();
            let readme = repo.path().join(dir).join("README.md");
            std::fs::write(readme, dir).unwrap();
        }
        let files = vec![
            repo.path().join("one/README.md"),
            repo.path().join("two/README.md"),
        ];

        let target = work.path().join("preprocess");
        let report =
            preprocess(&files, &target, &FileOperation, &no_excludes())
                .unwrap();
        assert_eq!(report.success, 2);
        let kept = std::fs::read_to_string(target.join("README.md")).unwrap();
        assert_eq!(kept, "two");
    }

    #[test]
    fn excluded_paths_are_skipped() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let vendored = repo.path().join("node_modules");
        std::fs::create_dir(&vendored).unwrap();
        std::fs::write(vendored.join("x.md"), "vendored").unwrap();
        std::fs::write(repo.path().join("y.md"), "kept").unwrap();

        let files = vec![vendored.join("x.md"), repo.path().join("y.md")];
        let exclude = exclude_set(&["**/node_modules/**".to_string()]).unwrap();
        let target = work.path().join("preprocess");
        let report =
            preprocess(&files, &target, &FileOperation, &exclude).unwrap();

        assert_eq!(report.success, 1);
        assert_eq!(report.skip, 1);
        assert!(!target.join("x.md").exists());
    }

    #[test]
    fn invalid_exclude_pattern_is_a_config_error() {
        let err = exclude_set(&["a[".to_string()]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn missing_input_counts_as_failure() {
        let work = tempfile::tempdir().unwrap();
        let target = work.path().join("preprocess");
        let files = vec![work.path().join("gone.md")];
        let report =
            preprocess(&files, &target, &FileOperation, &no_excludes())
                .unwrap();
        assert_eq!(report.fail, 1);
        assert_eq!(report.success, 0);
    }

    #[test]
    fn corpus_skips_unreadable_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# Title\nbody text here")
            .unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"%PDF-1.7").unwrap();
        std::fs::write(dir.path().join("c.txt"), "plain text").unwrap();

        let corpus = load_corpus(dir.path(), &FileOperation).unwrap();
        assert_eq!(corpus.unreadable, 1);
        let names: Vec<String> =
            corpus.documents.iter().map(Document::basename).collect();
        assert_eq!(names, vec!["a.md", "c.txt"]);
        assert!(corpus.documents.iter().all(|d| d.source.is_absolute()));
    }

    #[test]
    fn hidden_base_names_survive_into_the_corpus() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let hidden = repo.path().join(".guide.md");
        std::fs::write(&hidden, "# Guide\nInstall the package first.").unwrap();
        let visible = repo.path().join("faq.txt");
        std::fs::write(&visible, "Frequently asked questions.").unwrap();

        let target = work.path().join("preprocess");
        let report = preprocess(
            &[hidden, visible],
            &target,
            &FileOperation,
            &no_excludes(),
        )
        .unwrap();
        assert_eq!(report.success, 2);

        let corpus = load_corpus(&target, &FileOperation).unwrap();
        assert_eq!(corpus.documents.len() + corpus.unreadable, report.success);
        let names: Vec<String> =
            corpus.documents.iter().map(Document::basename).collect();
        assert_eq!(names, vec![".guide.md", "faq.txt"]);
    }

    #[test]
    fn empty_files_contribute_no_chunks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("empty.md"), "").unwrap();
        std::fs::write(
            dir.path().join("guide.md"),
            "# Guide\nInstall the package first.",
        )
        .unwrap();

        let corpus = load_corpus(dir.path(), &FileOperation).unwrap();
        assert_eq!(corpus.documents.len(), 2);
        for policy in ChunkPolicy::ALL {
            let chunks = chunk_corpus(policy, &corpus.documents);
            assert!(chunks.iter().all(|c| c.source.ends_with("guide.md")));
            assert!(!chunks.is_empty());
        }
    }
}

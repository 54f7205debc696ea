use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "docgate",
    about = "Build, calibrate and probe the retrieval indexes of a document QA assistant"
)]
pub struct Cli {
    /// Working directory holding the preprocessed corpus and both indexes
    #[arg(long = "work_dir")]
    pub work_dir: Option<PathBuf>,

    /// Root directory of the source documents
    #[arg(long = "repo_dir", default_value = "repodir")]
    pub repo_dir: PathBuf,

    /// JSON list of questions the corpus should answer
    #[arg(
        long = "good_questions",
        default_value = "resource/good_questions.json"
    )]
    pub good_questions: PathBuf,

    /// JSON list of questions the corpus should reject
    #[arg(
        long = "bad_questions",
        default_value = "resource/bad_questions.json"
    )]
    pub bad_questions: PathBuf,

    /// Configuration file; calibration rewrites its reject throttle
    #[arg(
        long = "config_path",
        default_value = crate::config::DEFAULT_CONFIG_PATH
    )]
    pub config_path: PathBuf,

    /// JSON list of questions to evaluate against an existing work directory
    /// instead of rebuilding it
    #[arg(long)]
    pub sample: Option<PathBuf>,

    /// Override the ColBERT model ID or local model path
    #[arg(long)]
    pub model: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long)]
    pub quiet: bool,
}

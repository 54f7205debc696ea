use std::{
    io::Write,
    path::{Path, PathBuf},
};

use clap::Parser;
use docgate::{
    FeatureStore,
    WorkDir,
    cli::Cli,
    config::Config,
    error::{self, Error},
    pipeline::Evaluation,
    text_util::{MAX_QUESTION_CHARS, preview, truncate_chars},
    walker::discover_files,
};
use tracing_subscriber::EnvFilter;

/// Questions probed after a rebuild when no sample file is given.
const PROBE_QUESTIONS: &[&str] = &[
    "请问找不到libmmdeploy.so怎么办",
    "mmdeploy支持ncnn vulkan部署么，我只找到了ncnn cpu 版本",
    "mmdeploy 现在支持 mmtrack 模型转换了么",
    "请问 ncnn 全称是什么",
    "有啥中文的 text to speech 模型吗?",
    "今天中午吃什么？",
    "mmpose installation",
];

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCGATE_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let config = Config::load(&cli.config_path)?;
    let work_dir = WorkDir::resolve(cli.work_dir.as_deref())?;
    let mut store =
        FeatureStore::with_models(config.feature_store, cli.model.as_deref())?;

    let (questions, record) = match &cli.sample {
        None => {
            rebuild(&mut store, &cli, &work_dir)?;
            let probes =
                PROBE_QUESTIONS.iter().map(|q| q.to_string()).collect();
            (probes, false)
        }
        Some(sample) => {
            store.load(&work_dir)?;
            (read_questions(sample)?, true)
        }
    };

    for question in &questions {
        let question = truncate_chars(question, MAX_QUESTION_CHARS);
        let evaluation = store.evaluate(question)?;
        print_evaluation(question, &evaluation);

        if record {
            let path = if evaluation.decision.reject {
                work_dir.negative_samples()
            } else {
                work_dir.positive_samples()
            };
            append_line(&path, question)?;
        }
    }

    Ok(())
}

/// Preprocess the repository, build both indexes and calibrate the reject
/// throttle into the config file.
fn rebuild(
    store: &mut FeatureStore,
    cli: &Cli,
    work_dir: &WorkDir,
) -> error::Result<()> {
    let good = read_questions(&cli.good_questions)?;
    let bad = read_questions(&cli.bad_questions)?;

    let files: Vec<PathBuf> = discover_files(&cli.repo_dir)?
        .into_iter()
        .map(|file| file.absolute_path)
        .collect();
    let report = store.initialize(&files, work_dir)?;
    eprintln!(
        "Preprocessed {} file(s): {} success, {} fail, {} skip, {} deferred",
        files.len(),
        report.preprocess.success,
        report.preprocess.fail,
        report.preprocess.skip,
        report.preprocess.deferred,
    );
    eprintln!(
        "Indexed {} response chunk(s) and {} reject chunk(s) ({} unreadable file(s))",
        report.response_chunks, report.reject_chunks, report.unreadable,
    );

    store.load(work_dir)?;
    let calibration = store.update_throttle(&cli.config_path, &good, &bad)?;
    eprintln!(
        "Reject throttle set to {:.4} (precision {:.3}, recall {:.3}, f1 {:.3}) in {}",
        calibration.threshold,
        calibration.precision,
        calibration.recall,
        calibration.f1,
        cli.config_path.display(),
    );
    Ok(())
}

fn read_questions(path: &Path) -> error::Result<Vec<String>> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "cannot read questions from {}: {e}",
            path.display()
        ))
    })?;
    Ok(serde_json::from_str(&contents)?)
}

fn append_line(path: &Path, line: &str) -> error::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{line}")?;
    Ok(())
}

fn print_evaluation(question: &str, evaluation: &Evaluation<'_>) {
    let verdict = if evaluation.decision.reject {
        "reject"
    } else {
        "accept"
    };
    let score = evaluation
        .decision
        .score
        .map_or_else(|| "-----".to_string(), |s| format!("{s:.3}"));
    println!("{verdict} [{score}] {question}");

    for (rank, passage) in evaluation.passages.iter().enumerate() {
        let source = passage
            .chunk
            .source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        println!(
            "{:>5}. [{:.3}] {}  {}",
            rank + 1,
            passage.score,
            source,
            preview(&passage.chunk.content, 80)
        );
    }
}

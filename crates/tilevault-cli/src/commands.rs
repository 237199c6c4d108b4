use colored::Colorize;
use tilevault_checkpoint::CheckpointError;
use tilevault_compactor::{compact_log, CompactError, CompactionReport};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn};

use crate::cli::Cli;
use crate::config::Config;

/// Outcome of a run over every configured log.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub report: CompactionReport,
    pub failed_logs: Vec<String>,
}

/// Run one compaction pass per configured log. Returns `false` if any log
/// failed.
pub async fn run_command(cli: Cli) -> anyhow::Result<bool> {
    let config = Config::load(&cli.config)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, stopping");
                cancel.cancel();
            }
        }
    });

    let summary = compact_all(&config, &cancel).await;
    let report = summary.report;
    info!(
        files = report.removed_files,
        dirs = report.removed_dirs,
        bytes = report.removed_bytes,
        "done"
    );

    if summary.failed_logs.is_empty() {
        println!("{} Removed {}", "✓".green().bold(), report);
        Ok(true)
    } else {
        println!(
            "{} Removed {}; failed: {}",
            "✗".red().bold(),
            report,
            summary.failed_logs.join(", ").yellow()
        );
        Ok(false)
    }
}

/// Compact each log in turn. A failing log is recorded and skipped. An
/// unusable log descriptor or cancellation stops the loop.
pub async fn compact_all(config: &Config, cancel: &CancellationToken) -> RunSummary {
    let mut summary = RunSummary::default();

    for log in &config.logs {
        let span = info_span!("compact", log = %log.short_name);
        let root = log.local_directory.clone();
        let token = cancel.clone();
        let before = summary.report;
        let mut report = summary.report;

        let joined = tokio::task::spawn_blocking(move || {
            let _enter = span.enter();
            let result = compact_log(&root, &token, &mut report);
            if let Err(err) = &result {
                error!(error = %err, "compaction failed");
            }
            (result, report)
        })
        .await;

        match joined {
            Ok((result, report)) => {
                summary.report = report;
                match result {
                    Ok(()) => {}
                    Err(CompactError::Cancelled)
                    | Err(CompactError::Checkpoint(CheckpointError::Config(_))) => {
                        summary.failed_logs.push(log.short_name.clone());
                        break;
                    }
                    Err(_) => summary.failed_logs.push(log.short_name.clone()),
                }
            }
            Err(join) => {
                error!(log = %log.short_name, error = %join, "compaction task panicked");
                summary.report = before;
                summary.failed_logs.push(log.short_name.clone());
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    use tilevault_checkpoint::{
        Checkpoint, Rfc6962Signer, CHECKPOINT_FILE, LOG_DESCRIPTOR_FILE,
    };

    fn signed_log(root: &Path, name: &str, size: u64) {
        let signer = Rfc6962Signer::generate(name).unwrap();
        fs::write(
            root.join(LOG_DESCRIPTOR_FILE),
            signer.descriptor().to_json().unwrap(),
        )
        .unwrap();
        let checkpoint = Checkpoint {
            origin: name.into(),
            size,
            root_hash: [1u8; 32],
            extensions: vec![],
        };
        fs::write(
            root.join(CHECKPOINT_FILE),
            signer.sign_checkpoint(&checkpoint).unwrap(),
        )
        .unwrap();
    }

    fn touch(root: &Path, rel: &str, len: usize) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![0u8; len]).unwrap();
    }

    fn config(logs: &[(&str, &Path)]) -> Config {
        let mut yaml = String::from("Logs:\n");
        for (name, dir) in logs {
            yaml.push_str(&format!(
                "  - ShortName: {name}\n    LocalDirectory: {}\n",
                dir.display()
            ));
        }
        Config::parse(&yaml).unwrap()
    }

    #[tokio::test]
    async fn failing_log_does_not_stop_the_others() {
        let tmp = tempfile::tempdir().unwrap();
        let broken = tmp.path().join("broken");
        let good = tmp.path().join("good");
        fs::create_dir_all(&broken).unwrap();
        fs::create_dir_all(&good).unwrap();

        signed_log(&good, "example.com/good", 1000);
        touch(&good, "tile/0/000", 8192);
        touch(&good, "tile/0/000.p/16", 512);
        touch(&broken, "tile/0/000", 8192);
        touch(&broken, "tile/0/000.p/16", 512);

        let config = config(&[("broken", &broken), ("good", &good)]);
        let summary = compact_all(&config, &CancellationToken::new()).await;

        assert_eq!(summary.failed_logs, vec!["broken".to_string()]);
        assert_eq!(summary.report.removed_files, 1);
        assert_eq!(summary.report.removed_bytes, 512);
        assert!(broken.join("tile/0/000.p/16").exists());
        assert!(!good.join("tile/0/000.p").exists());
    }

    #[tokio::test]
    async fn bad_descriptor_stops_the_run() {
        let tmp = tempfile::tempdir().unwrap();
        let bad = tmp.path().join("bad");
        let good = tmp.path().join("good");
        fs::create_dir_all(&bad).unwrap();
        fs::create_dir_all(&good).unwrap();
        fs::write(bad.join(LOG_DESCRIPTOR_FILE), r#"{"description":"example.com/bad"}"#).unwrap();
        signed_log(&good, "example.com/good", 1000);
        touch(&good, "tile/0/000", 8192);
        touch(&good, "tile/0/000.p/16", 512);

        let logs = config(&[("bad", &bad), ("good", &good)]);
        let summary = compact_all(&logs, &CancellationToken::new()).await;
        assert_eq!(summary.failed_logs, vec!["bad".to_string()]);
        assert!(good.join("tile/0/000.p/16").exists());
    }

    #[tokio::test]
    async fn cancellation_stops_the_run() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        for (dir, name) in [(&a, "example.com/a"), (&b, "example.com/b")] {
            fs::create_dir_all(dir).unwrap();
            signed_log(dir, name, 1000);
            touch(dir, "tile/0/000", 8192);
            touch(dir, "tile/0/000.p/16", 512);
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = compact_all(&config(&[("a", &a), ("b", &b)]), &cancel).await;

        assert_eq!(summary.failed_logs, vec!["a".to_string()]);
        assert!(summary.report.is_empty());
        assert!(a.join("tile/0/000.p/16").exists());
        assert!(b.join("tile/0/000.p/16").exists());
    }
}

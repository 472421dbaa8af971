use super::open_output;
use anyhow::Result;
use dumpsync::config::Config;
use dumpsync::processors::{JsonLinesWriter, RevisionStatistics};
use dumpsync::progress::RunSummary;
use dumpsync::DumpProcessingController;
use std::path::PathBuf;

pub struct ProcessOptions {
    pub output: Option<PathBuf>,
    pub model: Option<String>,
    pub current_only: bool,
    pub documents: bool,
    pub main_only: bool,
}

pub fn process_revisions(config: Config, options: ProcessOptions) -> Result<()> {
    let mut writer = JsonLinesWriter::new(open_output(options.output.as_deref())?);
    let mut stats = RevisionStatistics::new();

    let summary = {
        let mut controller = DumpProcessingController::new(config)?;
        let model = options.model.as_deref();
        if options.documents {
            controller.register_document_processor(&mut writer, model, options.current_only);
        } else {
            controller.register_revision_processor(&mut writer, model, options.current_only);
        }
        controller.register_revision_processor(&mut stats, None, options.current_only);

        if options.main_only {
            controller.process_most_recent_main_dump()?
        } else {
            controller.process_all_recent_revision_dumps()
        }
    };
    writer.flush()?;

    summary.print();
    println!("Lines written:        {}", writer.written());
    println!("Anonymous revisions:  {}", stats.anonymous_revisions);
    for (model, count) in &stats.by_content_model {
        println!("  {:<24} {}", model, count);
    }
    check(&summary)
}

/// Fail the command when dumps could not be processed
pub fn check(summary: &RunSummary) -> Result<()> {
    if !summary.dumps_failed.is_empty() {
        anyhow::bail!("{} dump(s) failed to process", summary.dumps_failed.len());
    }
    Ok(())
}

use super::open_output;
use super::process::check;
use anyhow::Result;
use dumpsync::config::Config;
use dumpsync::processors::JsonLinesWriter;
use dumpsync::DumpProcessingController;
use std::path::PathBuf;

pub fn process_json(config: Config, output: Option<PathBuf>, model: Option<String>) -> Result<()> {
    let mut writer = JsonLinesWriter::new(open_output(output.as_deref())?);

    let summary = {
        let mut controller = DumpProcessingController::new(config)?;
        controller.register_document_processor(&mut writer, model.as_deref(), true);
        controller.process_most_recent_json_dump()?
    };
    writer.flush()?;

    summary.print();
    println!("Documents written:    {}", writer.written());
    check(&summary)
}

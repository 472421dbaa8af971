use super::open_output;
use super::process::check;
use anyhow::Result;
use dumpsync::config::Config;
use dumpsync::processors::JsonLinesWriter;
use dumpsync::DumpProcessingController;
use std::path::PathBuf;

pub fn process_sites(config: Config, output: Option<PathBuf>) -> Result<()> {
    let mut writer = JsonLinesWriter::new(open_output(output.as_deref())?);

    let summary = {
        let mut controller = DumpProcessingController::new(config)?;
        controller.register_sites_processor(&mut writer);
        controller.process_most_recent_sites_dump()?
    };
    writer.flush()?;

    summary.print();
    println!("Sites written:        {}", writer.written());
    check(&summary)
}

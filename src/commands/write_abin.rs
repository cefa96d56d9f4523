// ABOUTME: write-abin command - submits one calibration record to the source and two replicas
// ABOUTME: Prints the combined status; exits non-zero on validation or any destination failure

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::store::{self, Store};
use crate::triple::{KnownTags, TripleWriteRequest, TripleWriter};

pub struct WriteAbinOptions {
    /// LabVIEW time, seconds
    pub timestamp: f64,
    pub version: f64,
    pub description: String,
    pub payload_file: PathBuf,
}

pub async fn write_abin(config: &Config, opts: WriteAbinOptions) -> Result<()> {
    let Some(triple) = &config.triple_write else {
        bail!("No [triple_write] section in the configuration");
    };
    let tags: KnownTags = triple.known_tags.iter().cloned().collect();

    let payload = tokio::fs::read(&opts.payload_file)
        .await
        .with_context(|| format!("Failed to read payload {}", opts.payload_file.display()))?;

    let [first, second, ..] = config.destinations.as_slice() else {
        bail!("Triple writes need two destinations in the configuration");
    };
    let authoritative = store::connect_or_unreachable(&config.source).await;
    let replicas: [Arc<dyn Store>; 2] = [
        store::connect_or_unreachable(first).await,
        store::connect_or_unreachable(second).await,
    ];

    let writer = TripleWriter::new(authoritative, replicas, tags, config.timeouts().bulk);
    let status = writer
        .submit(TripleWriteRequest {
            timestamp: opts.timestamp,
            version: opts.version,
            description: opts.description,
            payload,
        })
        .await?;

    println!("{}", status);
    if !status.is_success() {
        bail!("abin record was not written everywhere");
    }
    Ok(())
}

// src/pipeline.rs

use crate::day_folder::Clock;
use crate::error::{LedgerError, PipelineError, RemoteError};
use crate::excel_sink::LedgerSink;
use crate::forwarder::InvoiceForwarder;
use crate::mapping::MappedInvoice;
use crate::remote::DocumentApi;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, debug, error, info, info_span};

/// What happened to one file that got through extract and map.
#[derive(Debug)]
pub struct PipelineReport {
    pub document_id: String,
    pub invoice: MappedInvoice,
    pub forwarded: Result<Value, RemoteError>,
    pub ledger: Result<PathBuf, LedgerError>,
}

/// extract -> map -> transform -> forward -> persist, for one file at a time.
pub struct Pipeline {
    documents: Arc<dyn DocumentApi>,
    forwarder: Arc<dyn InvoiceForwarder>,
    ledger: Arc<dyn LedgerSink>,
    clock: Arc<dyn Clock>,
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

impl Pipeline {
    pub fn new(
        documents: Arc<dyn DocumentApi>,
        forwarder: Arc<dyn InvoiceForwarder>,
        ledger: Arc<dyn LedgerSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            documents,
            forwarder,
            ledger,
            clock,
        }
    }

    /// Run every stage for `pdf_path`. Only extract and map failures abort;
    /// forward and persist outcomes are reported independently.
    pub async fn process(&self, pdf_path: &Path) -> Result<PipelineReport, PipelineError> {
        let span = info_span!("pipeline", file = %pdf_path.display());
        self.run_stages(pdf_path).instrument(span).await
    }

    async fn run_stages(&self, pdf_path: &Path) -> Result<PipelineReport, PipelineError> {
        info!("Processing new PDF");

        // Extract
        let started = Instant::now();
        info!(stage = "extract", "Starting document extract call");
        let extracted = match self.documents.extract(pdf_path).await {
            Ok(r) => {
                info!(
                    stage = "extract",
                    document_id = %r.document_id,
                    elapsed_ms = elapsed_ms(started),
                    "Document extract call successful"
                );
                debug!(stage = "extract", payload = %r.payload, "Extraction payload");
                r
            }
            Err(e) => {
                error!(
                    stage = "extract",
                    status = ?e.status(),
                    elapsed_ms = elapsed_ms(started),
                    error = %e,
                    "Document extract call failed; skipping file"
                );
                return Err(PipelineError::Extract(e));
            }
        };

        // Map
        let started = Instant::now();
        info!(stage = "map", document_id = %extracted.document_id, "Starting mapping call");
        let mapped = match self.documents.mapping(&extracted.document_id).await {
            Ok(m) => {
                info!(
                    stage = "map",
                    fields = m.len(),
                    elapsed_ms = elapsed_ms(started),
                    "Mapping call successful"
                );
                m
            }
            Err(e) => {
                error!(
                    stage = "map",
                    status = ?e.status(),
                    elapsed_ms = elapsed_ms(started),
                    error = %e,
                    "Mapping call failed; skipping file"
                );
                return Err(PipelineError::Map(e));
            }
        };

        // Transform
        let invoice = MappedInvoice::from_payload(mapped);
        let purchase = invoice.to_purchase_invoice();
        info!(
            stage = "transform",
            card_code = %invoice.card_code,
            lines = invoice.document_lines.len(),
            "Built document lines"
        );

        // Forward
        let started = Instant::now();
        info!(stage = "forward", "Starting forward to ERP");
        let forwarded = self.forwarder.forward(&purchase).await;
        match &forwarded {
            Ok(_) => info!(
                stage = "forward",
                elapsed_ms = elapsed_ms(started),
                "Successfully posted data to ERP"
            ),
            Err(e) => error!(
                stage = "forward",
                status = ?e.status(),
                elapsed_ms = elapsed_ms(started),
                error = %e,
                "Failed to post data to ERP"
            ),
        }

        // Persist
        let started = Instant::now();
        info!(stage = "persist", "Starting ledger append");
        let record = invoice.flatten();
        let ledger = self.ledger.append(&record, self.clock.today());
        match &ledger {
            Ok(path) => info!(
                stage = "persist",
                path = %path.display(),
                columns = record.len(),
                elapsed_ms = elapsed_ms(started),
                "Ledger append successful"
            ),
            Err(e) => error!(
                stage = "persist",
                elapsed_ms = elapsed_ms(started),
                error = %e,
                "Error appending to ledger"
            ),
        }

        Ok(PipelineReport {
            document_id: extracted.document_id,
            invoice,
            forwarded,
            ledger,
        })
    }
}

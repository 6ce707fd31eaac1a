use crate::node::Outbox;
use crate::protocol::{DeliveryFlags, Message, Route, VolleyRecord};
use crate::task::error::Result;
use tracing::warn;

/// Downstream consumer of volley records
#[cfg_attr(test, mockall::automock)]
pub trait RecordSink {
    fn emit(&mut self, record: VolleyRecord) -> Result<()>;
}

impl RecordSink for Vec<VolleyRecord> {
    fn emit(&mut self, record: VolleyRecord) -> Result<()> {
        self.push(record);
        Ok(())
    }
}

/// Sends every record to the collector as `DATA` and keeps a local copy.
///
/// A record the collector cannot be reached for is kept locally and counted;
/// it does not interrupt the volleys.
pub struct CollectorSink<'a, O: Outbox + ?Sized> {
    outbox: &'a O,
    collector: Route,
    records: Vec<VolleyRecord>,
    undelivered: usize,
}

impl<'a, O: Outbox + ?Sized> CollectorSink<'a, O> {
    pub fn new(outbox: &'a O, collector: Route) -> Self {
        Self {
            outbox,
            collector,
            records: Vec::new(),
            undelivered: 0,
        }
    }

    pub fn records(&self) -> &[VolleyRecord] {
        &self.records
    }

    pub fn undelivered(&self) -> usize {
        self.undelivered
    }

    pub fn into_records(self) -> Vec<VolleyRecord> {
        self.records
    }
}

impl<O: Outbox + ?Sized> RecordSink for CollectorSink<'_, O> {
    fn emit(&mut self, record: VolleyRecord) -> Result<()> {
        if let Err(e) = self.outbox.send(
            self.collector.clone(),
            Message::Data(record.clone()),
            DeliveryFlags::NONE,
        ) {
            warn!(
                trial_num = record.trial_num,
                collector = %self.collector,
                error = %e,
                "Failed to deliver record to collector"
            );
            self.undelivered += 1;
        }
        self.records.push(record);
        Ok(())
    }
}

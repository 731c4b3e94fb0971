//! Session records and the log-line format.
//!
//! A record has one slot per (device, workload) pair in declared device order
//! and fixed workload order. Slots are filled strictly in that order and the
//! record can only be serialized once every slot is filled, so a log line is
//! never partial.

use crate::error::{BenchError, BenchResult};
use crate::types::{DeviceId, DeviceUnderTest, Measurement, Workload};
use serde::Serialize;
use std::fmt::Write as _;

/// Field written for a slot without a duration.
pub const SENTINEL_FIELD: &str = "NaN";

/// Decimal digits of every duration field.
pub const FIELD_PRECISION: usize = 4;

/// Column header for the given device order, newline-terminated.
///
/// Column names are `<label><suffix>`, e.g. `rustGPIO,rustSort,...`.
#[must_use]
pub fn header_line(devices: &[DeviceUnderTest]) -> String {
    let mut line = devices
        .iter()
        .flat_map(|dut| {
            Workload::ALL
                .iter()
                .map(move |w| format!("{}{}", dut.label(), w.column_suffix()))
        })
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

/// Measurements of one full pass over all configured devices.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    session: u64,
    #[serde(skip)]
    slots: Vec<(DeviceId, Workload)>,
    measurements: Vec<Measurement>,
}

impl SessionRecord {
    /// Empty record for pass `session` over `devices`.
    #[must_use]
    pub fn new(session: u64, devices: &[DeviceUnderTest]) -> Self {
        let slots: Vec<_> = devices
            .iter()
            .flat_map(|dut| Workload::ALL.iter().map(move |&w| (dut.id, w)))
            .collect();
        Self {
            session,
            measurements: Vec::with_capacity(slots.len()),
            slots,
        }
    }

    /// Zero-based pass index.
    #[must_use]
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Measurements collected so far.
    #[must_use]
    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    /// Number of slots in a complete record.
    #[must_use]
    pub fn expected_len(&self) -> usize {
        self.slots.len()
    }

    /// Whether every slot is filled.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.measurements.len() == self.slots.len()
    }

    /// Number of sentinel slots.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.measurements
            .iter()
            .filter(|m| m.failure().is_some())
            .count()
    }

    /// Append the next measurement.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolViolation` if the measurement is not the one the
    /// next slot expects, or the record is already complete.
    pub fn push(&mut self, measurement: Measurement) -> BenchResult<()> {
        let Some(&(device, workload)) = self.slots.get(self.measurements.len()) else {
            return Err(BenchError::ProtocolViolation(format!(
                "session {} record already complete, got {} {}",
                self.session,
                measurement.device(),
                measurement.workload()
            )));
        };

        if (measurement.device(), measurement.workload()) != (device, workload) {
            return Err(BenchError::ProtocolViolation(format!(
                "expected measurement for {device} {workload}, got {} {}",
                measurement.device(),
                measurement.workload()
            )));
        }

        self.measurements.push(measurement);
        Ok(())
    }

    /// Append a batch of measurements in order.
    ///
    /// # Errors
    ///
    /// Fails on the first out-of-order measurement; earlier ones stay pushed.
    pub fn extend<I>(&mut self, measurements: I) -> BenchResult<()>
    where
        I: IntoIterator<Item = Measurement>,
    {
        for measurement in measurements {
            self.push(measurement)?;
        }
        Ok(())
    }

    /// Serialize as one newline-terminated, comma-separated line.
    ///
    /// # Errors
    ///
    /// Returns `IncompleteRecord` unless every slot is filled.
    pub fn to_log_line(&self) -> BenchResult<String> {
        if !self.is_complete() {
            return Err(BenchError::IncompleteRecord {
                filled: self.measurements.len(),
                expected: self.slots.len(),
            });
        }

        let mut line = String::with_capacity(self.measurements.len() * 10);
        for (i, measurement) in self.measurements.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            match measurement.millis() {
                Some(millis) => {
                    let _ = write!(line, "{millis:.prec$}", prec = FIELD_PRECISION);
                }
                None => line.push_str(SENTINEL_FIELD),
            }
        }
        line.push('\n');
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FailureKind;

    fn two_devices() -> Vec<DeviceUnderTest> {
        vec![
            DeviceUnderTest::with_default_wiring(DeviceId::A),
            DeviceUnderTest::with_default_wiring(DeviceId::B),
        ]
    }

    fn fill(record: &mut SessionRecord, devices: &[DeviceUnderTest], millis: f64) {
        for dut in devices {
            for w in Workload::ALL {
                record
                    .push(Measurement::completed(dut.id, w, 0, millis))
                    .unwrap();
            }
        }
    }

    #[test]
    fn test_header_line() {
        let devices: Vec<_> = DeviceId::ALL
            .iter()
            .map(|&id| DeviceUnderTest::with_default_wiring(id))
            .collect();
        assert_eq!(
            header_line(&devices),
            "rustGPIO,rustSort,rustAlloc,rustSeries,cppGPIO,cppSort,cppAlloc,cppSeries,\
             circpyGPIO,circpySort,circpyAlloc,circpySeries,\
             micropyGPIO,micropySort,micropyAlloc,micropySeries\n"
        );
    }

    #[test]
    fn test_log_line_format() {
        let devices = two_devices();
        let mut record = SessionRecord::new(0, &devices);
        fill(&mut record, &devices, 2.0);

        let line = record.to_log_line().unwrap();
        assert_eq!(
            line,
            "2.0000,2.0000,2.0000,2.0000,2.0000,2.0000,2.0000,2.0000\n"
        );
    }

    #[test]
    fn test_rounding_to_four_digits() {
        let devices = vec![DeviceUnderTest::with_default_wiring(DeviceId::A)];
        let mut record = SessionRecord::new(0, &devices);
        record
            .push(Measurement::completed(DeviceId::A, Workload::GpioRoundTrip, 1, 0.000_008))
            .unwrap();
        record
            .push(Measurement::completed(DeviceId::A, Workload::Sort, 1, 1234.567_89))
            .unwrap();
        record
            .push(Measurement::failed(DeviceId::A, Workload::MemoryChurn, FailureKind::Timeout))
            .unwrap();
        record
            .push(Measurement::failed(DeviceId::A, Workload::SeriesCompute, FailureKind::Skipped))
            .unwrap();

        assert_eq!(record.to_log_line().unwrap(), "0.0000,1234.5679,NaN,NaN\n");
        assert_eq!(record.failed_count(), 2);
    }

    #[test]
    fn test_incomplete_record_not_serialized() {
        let devices = two_devices();
        let mut record = SessionRecord::new(3, &devices);
        record
            .push(Measurement::completed(DeviceId::A, Workload::GpioRoundTrip, 0, 1.0))
            .unwrap();

        assert_eq!(
            record.to_log_line(),
            Err(BenchError::IncompleteRecord {
                filled: 1,
                expected: 8
            })
        );
    }

    #[test]
    fn test_out_of_order_push_rejected() {
        let devices = two_devices();
        let mut record = SessionRecord::new(0, &devices);

        // Device B before device A
        let result = record.push(Measurement::completed(DeviceId::B, Workload::GpioRoundTrip, 0, 1.0));
        assert!(matches!(result, Err(BenchError::ProtocolViolation(_))));

        // Sort before GPIO
        let result = record.push(Measurement::completed(DeviceId::A, Workload::Sort, 0, 1.0));
        assert!(result.is_err());
        assert!(record.measurements().is_empty());
    }

    #[test]
    fn test_push_past_end_rejected() {
        let devices = vec![DeviceUnderTest::with_default_wiring(DeviceId::A)];
        let mut record = SessionRecord::new(0, &devices);
        fill(&mut record, &devices, 1.0);
        assert!(record.is_complete());

        let extra = Measurement::completed(DeviceId::A, Workload::GpioRoundTrip, 0, 1.0);
        assert!(record.push(extra).is_err());
    }

    #[test]
    fn test_record_serializes_to_json() {
        let devices = vec![DeviceUnderTest::with_default_wiring(DeviceId::A)];
        let mut record = SessionRecord::new(7, &devices);
        fill(&mut record, &devices, 0.5);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["session"], 7);
        assert_eq!(json["measurements"][0]["workload"], "gpio_round_trip");
        assert_eq!(json["measurements"][0]["outcome"]["status"], "completed");
    }
}

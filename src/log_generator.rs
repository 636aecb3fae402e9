//! Synthetic log generation for driving the processor.
//!
//! Each generated batch comes from one simulated edge device: every record in the
//! batch shares the same `Arc<Process>`, the way decoded wire batches do.

use std::sync::Arc;

use chrono::Utc;
use rand::distributions::{Distribution, WeightedError, WeightedIndex};
use rand::Rng;
use uuid::Uuid;

use crate::model::{AnyValue, KeyValue, LogRecord, Process, Severity};

/// Sensor types for simulated devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorType {
    Temperature,
    Humidity,
    Pressure,
    Vibration,
    Power,
}

impl SensorType {
    pub fn all() -> &'static [SensorType] {
        &[
            SensorType::Temperature,
            SensorType::Humidity,
            SensorType::Pressure,
            SensorType::Vibration,
            SensorType::Power,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            SensorType::Temperature => "temperature",
            SensorType::Humidity => "humidity",
            SensorType::Pressure => "pressure",
            SensorType::Vibration => "vibration",
            SensorType::Power => "power",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            SensorType::Temperature => "celsius",
            SensorType::Humidity => "percent",
            SensorType::Pressure => "hpa",
            SensorType::Vibration => "g",
            SensorType::Power => "watts",
        }
    }

    /// Reading range for a severity; alarms fall outside the normal band.
    fn reading_range(&self, severity: Severity) -> (f64, f64) {
        let alarm = matches!(severity, Severity::Error | Severity::Fatal);
        let warn = severity == Severity::Warn;
        match self {
            SensorType::Temperature if alarm => (35.0, 50.0),
            SensorType::Temperature if warn => (26.0, 35.0),
            SensorType::Temperature => (18.0, 26.0),
            SensorType::Humidity if alarm => (85.0, 100.0),
            SensorType::Humidity if warn => (70.0, 85.0),
            SensorType::Humidity => (30.0, 70.0),
            SensorType::Pressure if alarm => (950.0, 980.0),
            SensorType::Pressure if warn => (980.0, 1000.0),
            SensorType::Pressure => (1000.0, 1025.0),
            SensorType::Vibration if alarm => (2.0, 5.0),
            SensorType::Vibration if warn => (0.8, 2.0),
            SensorType::Vibration => (0.0, 0.8),
            SensorType::Power if alarm => (2000.0, 3000.0),
            SensorType::Power if warn => (1500.0, 2000.0),
            SensorType::Power => (100.0, 1500.0),
        }
    }
}

/// Configuration for the log generator.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Number of simulated devices per sensor type
    pub devices_per_type: usize,

    /// Records per generated batch
    pub batch_size: usize,

    /// Relative weights for Trace, Debug, Info, Warn, Error and Fatal
    pub severity_weights: [u32; 6],

    /// Chance (0.0 - 1.0) that a batch carries an empty service name
    pub empty_service_rate: f64,

    /// Attach random trace and span ids
    pub include_trace_context: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            devices_per_type: 3,
            batch_size: 20,
            // Trace: 5%, Debug: 15%, Info: 60%, Warn: 12%, Error: 7%, Fatal: 1%
            severity_weights: [5, 15, 60, 12, 7, 1],
            empty_service_rate: 0.01,
            include_trace_context: true,
        }
    }
}

/// Generates batches of records from simulated devices.
pub struct LogGenerator {
    config: GeneratorConfig,
    severity_weights: WeightedIndex<u32>,
}

impl LogGenerator {
    /// Fails if every severity weight is zero.
    pub fn new(config: GeneratorConfig) -> Result<Self, WeightedError> {
        let severity_weights = WeightedIndex::new(config.severity_weights)?;
        Ok(Self {
            config,
            severity_weights,
        })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Generate one batch of `batch_size` records sharing a single process.
    pub fn generate_batch(&self) -> Vec<LogRecord> {
        let mut rng = rand::thread_rng();

        let sensor_types = SensorType::all();
        let sensor_type = sensor_types[rng.gen_range(0..sensor_types.len())];
        let process = Arc::new(self.device_process(&mut rng, sensor_type));

        (0..self.config.batch_size)
            .map(|_| self.generate_record(&mut rng, &process, sensor_type))
            .collect()
    }

    fn device_process(&self, rng: &mut impl Rng, sensor_type: SensorType) -> Process {
        let instance = rng.gen_range(1..=self.config.devices_per_type.max(1));
        let device_id = format!("edge-{}-{:03}", sensor_type.name(), instance);
        let service_name = if rng.gen_bool(self.config.empty_service_rate.clamp(0.0, 1.0)) {
            String::new()
        } else {
            device_id.clone()
        };

        Process::new(service_name).with_attributes(vec![
            KeyValue::string("device.id", device_id),
            KeyValue::string("sensor.type", sensor_type.name()),
        ])
    }

    fn generate_record(
        &self,
        rng: &mut impl Rng,
        process: &Arc<Process>,
        sensor_type: SensorType,
    ) -> LogRecord {
        let severity = Severity::all()[self.severity_weights.sample(rng)];
        let (low, high) = sensor_type.reading_range(severity);
        let reading = rng.gen_range(low..high);

        let mut record = LogRecord::new(
            process.clone(),
            severity,
            format_message(sensor_type, severity, reading),
        );
        let now = Utc::now().timestamp_nanos_opt().unwrap_or_default().max(0) as u64;
        record.time_unix_nano = now;
        record.observed_time_unix_nano = now;
        record.attributes = vec![
            KeyValue {
                key: "reading".to_string(),
                value: AnyValue::Double(reading),
            },
            KeyValue::string("unit", sensor_type.unit()),
        ];
        if self.config.include_trace_context {
            record.trace_id = Uuid::new_v4().as_bytes().to_vec();
            record.span_id = rng.gen::<[u8; 8]>().to_vec();
        }
        record
    }
}

fn format_message(sensor_type: SensorType, severity: Severity, reading: f64) -> String {
    let unit = sensor_type.unit();
    let name = sensor_type.name();
    match severity {
        Severity::Error | Severity::Fatal => {
            format!("CRITICAL: {} reading {:.1} {} outside safe range", name, reading, unit)
        }
        Severity::Warn => format!("{} {:.1} {} approaching threshold", name, reading, unit),
        Severity::Debug | Severity::Trace => {
            format!("Raw {} sample converted to {:.2} {}", name, reading, unit)
        }
        _ => format!("{} reading: {:.1} {}", name, reading, unit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(config: GeneratorConfig) -> LogGenerator {
        LogGenerator::new(config).unwrap()
    }

    #[test]
    fn test_batch_shares_one_process() {
        let generator = generator(GeneratorConfig::default());
        let batch = generator.generate_batch();

        assert_eq!(batch.len(), 20);
        let first = batch[0].process.clone().unwrap();
        for record in &batch {
            assert!(Arc::ptr_eq(record.process.as_ref().unwrap(), &first));
        }
    }

    #[test]
    fn test_generated_records_are_well_formed() {
        let generator = generator(GeneratorConfig {
            empty_service_rate: 0.0,
            ..GeneratorConfig::default()
        });

        for record in generator.generate_batch() {
            let severity = Severity::all()
                .iter()
                .find(|s| s.number() == record.severity_number)
                .expect("generated severity is a known level");
            assert_eq!(record.severity_text, severity.to_string());
            assert!(record.time_unix_nano > 0);
            assert_eq!(record.trace_id.len(), 16);
            assert_eq!(record.span_id.len(), 8);
            assert!(record.service_name().unwrap().starts_with("edge-"));
            assert!(record.body.as_ref().and_then(AnyValue::as_str).is_some());
        }
    }

    #[test]
    fn test_device_id_format() {
        let generator = generator(GeneratorConfig {
            devices_per_type: 2,
            empty_service_rate: 0.0,
            ..GeneratorConfig::default()
        });

        for _ in 0..20 {
            let batch = generator.generate_batch();
            let service_name = batch[0].service_name().unwrap();
            let parts: Vec<&str> = service_name.rsplitn(2, '-').collect();
            let instance: usize = parts[0].parse().unwrap();
            assert!((1..=2).contains(&instance));
            assert!(SensorType::all()
                .iter()
                .any(|sensor| parts[1] == format!("edge-{}", sensor.name())));
        }
    }

    #[test]
    fn test_empty_service_names_are_generated() {
        let generator = generator(GeneratorConfig {
            empty_service_rate: 1.0,
            ..GeneratorConfig::default()
        });
        let batch = generator.generate_batch();

        assert_eq!(batch[0].service_name(), Some(""));
        assert!(batch[0]
            .process
            .as_ref()
            .unwrap()
            .attributes
            .iter()
            .any(|kv| kv.key == "device.id"));
    }

    #[test]
    fn test_severity_weights_are_honoured() {
        let generator = generator(GeneratorConfig {
            severity_weights: [0, 0, 0, 0, 1, 0],
            ..GeneratorConfig::default()
        });

        for record in generator.generate_batch() {
            assert_eq!(record.severity_number, Severity::Error.number());
            assert!(record.body.as_ref().and_then(AnyValue::as_str).unwrap().starts_with("CRITICAL"));
        }
    }

    #[test]
    fn test_zero_weights_rejected() {
        assert!(LogGenerator::new(GeneratorConfig {
            severity_weights: [0; 6],
            ..GeneratorConfig::default()
        })
        .is_err());
    }

    #[test]
    fn test_trace_context_optional() {
        let generator = generator(GeneratorConfig {
            include_trace_context: false,
            ..GeneratorConfig::default()
        });
        assert!(generator
            .generate_batch()
            .iter()
            .all(|r| r.trace_id.is_empty() && r.span_id.is_empty()));
    }

    #[test]
    fn test_reading_ranges() {
        for sensor in SensorType::all() {
            for severity in Severity::all() {
                let (low, high) = sensor.reading_range(*severity);
                assert!(low < high, "{:?}/{:?}", sensor, severity);
            }
        }
    }
}

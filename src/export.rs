//! CSV export of the alert log

use crate::alerts::AlertEvent;

pub const CSV_HEADERS: [&str; 6] = [
    "timestamp",
    "variable",
    "valor",
    "umbral",
    "tipo_ejecucion",
    "motivo",
];

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV flush error: {0}")]
    Io(#[from] std::io::Error),
}

/// Render `events` as CSV in the order given
pub fn alerts_to_csv(events: &[AlertEvent]) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADERS)?;

    for event in events {
        writer.write_record([
            event.timestamp.to_rfc3339(),
            event.variable.clone(),
            event.value.to_string(),
            event.threshold_description.clone(),
            event.execution_mode.to_string(),
            event.reason.clone(),
        ])?;
    }

    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| ExportError::Io(e.into_error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::ExecutionMode;
    use chrono::{DateTime, Utc};

    #[test]
    fn test_alerts_to_csv() {
        let event = AlertEvent {
            timestamp: DateTime::parse_from_rfc3339("2025-06-15T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            variable: "voltaje".to_string(),
            value: 251.5,
            threshold_description: "Min: 200.00, Max: 240.00".to_string(),
            execution_mode: ExecutionMode::Automatic,
            reason: "voltaje (251.50) está por encima del umbral máximo (240.00)".to_string(),
        };

        let csv = String::from_utf8(alerts_to_csv(&[event]).unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], "timestamp,variable,valor,umbral,tipo_ejecucion,motivo");
        assert_eq!(
            lines[1],
            "2025-06-15T12:00:00+00:00,voltaje,251.5,\"Min: 200.00, Max: 240.00\",automatico,voltaje (251.50) está por encima del umbral máximo (240.00)"
        );
    }

    #[test]
    fn test_empty_log_has_headers_only() {
        let csv = String::from_utf8(alerts_to_csv(&[]).unwrap()).unwrap();
        assert_eq!(csv, "timestamp,variable,valor,umbral,tipo_ejecucion,motivo\n");
    }
}

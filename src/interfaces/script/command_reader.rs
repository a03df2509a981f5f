use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::{BufRead, BufReader, Read};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::geo::GeoPoint;
use crate::domain::request::{RequestStatus, ServiceType};

/// One line of a dispatch scenario. Entities are referred to by scenario
/// labels; the runner resolves labels to generated ids.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScriptCommand {
    RegisterMechanic {
        label: String,
        location: GeoPoint,
        services: Vec<ServiceType>,
    },
    CreateRequest {
        label: String,
        client: String,
        service_type: ServiceType,
        description: String,
        location: GeoPoint,
    },
    CreateBooking {
        label: String,
        client: String,
        mechanic: String,
        service_type: ServiceType,
        description: String,
        location: GeoPoint,
        amount: Decimal,
    },
    SubmitOffer {
        label: String,
        request: String,
        mechanic: String,
        price: Decimal,
        note: String,
        expires_in_secs: i64,
        location: GeoPoint,
    },
    AcceptOffer {
        offer: String,
        request: String,
    },
    Transition {
        request: String,
        to: RequestStatus,
    },
    PublishLocation {
        request: String,
        location: GeoPoint,
    },
    /// Omitting `code` relays the code the core actually issued, as the
    /// customer would hand it over in person.
    ValidateArrival {
        request: String,
        #[serde(default)]
        code: Option<String>,
    },
    ValidateCompletion {
        request: String,
        #[serde(default)]
        code: Option<String>,
    },
    Cancel {
        request: String,
    },
    SubmitReview {
        request: String,
        rating: u8,
        comment: String,
    },
}

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed command: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Reads scenario commands from a JSON-lines source.
///
/// Blank lines and `#` comments are skipped; each remaining line must hold
/// one command object. Lines are surfaced lazily so large scenarios stream.
pub struct CommandReader<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            reader: BufReader::new(source),
        }
    }

    pub fn commands(self) -> impl Iterator<Item = Result<ScriptCommand, ScriptError>> {
        self.reader.lines().filter_map(|line| match line {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    None
                } else {
                    Some(serde_json::from_str::<ScriptCommand>(trimmed).map_err(ScriptError::from))
                }
            }
            Err(err) => Some(Err(ScriptError::from(err))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_valid_stream() {
        let data = r#"
# a mechanic and an open request
{"op":"register_mechanic","label":"m1","location":{"lat":40.7,"lng":-74.0},"services":["towing"]}

{"op":"create_request","label":"r1","client":"c1","service_type":"tire_change","description":"flat","location":{"lat":40.71,"lng":-74.01}}
"#;
        let commands: Vec<_> = CommandReader::new(data.as_bytes()).commands().collect();
        assert_eq!(commands.len(), 2);
        assert!(matches!(
            commands[0].as_ref().unwrap(),
            ScriptCommand::RegisterMechanic { label, .. } if label == "m1"
        ));
        assert!(matches!(
            commands[1].as_ref().unwrap(),
            ScriptCommand::CreateRequest { service_type: ServiceType::TireChange, .. }
        ));
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "{\"op\":\"warp_drive\"}";
        let commands: Vec<_> = CommandReader::new(data.as_bytes()).commands().collect();
        assert_eq!(commands.len(), 1);
        assert!(matches!(commands[0], Err(ScriptError::Parse(_))));
    }

    #[test]
    fn test_transition_targets_use_wire_names() {
        let data = r#"{"op":"transition","request":"r1","to":"PAYMENT_AUTHORIZED"}"#;
        let command = CommandReader::new(data.as_bytes())
            .commands()
            .next()
            .unwrap()
            .unwrap();
        assert!(matches!(
            command,
            ScriptCommand::Transition { to: RequestStatus::PaymentAuthorized, .. }
        ));
    }
}

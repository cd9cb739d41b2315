use crate::application::workflow::{MerchantProfile, Registration};
use crate::domain::document::DocumentInput;
use crate::domain::employee::EmployeeStatus;
use crate::domain::merchant::{Maps, MerchantStatus, MerchantType, optional_status};
use crate::error::{MerchantError, Result};
use serde::Deserialize;
use std::io::BufRead;

/// One scripted workflow call. Merchants are addressed by vanity URL since
/// their ids are only known after registration.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Register(Registration),
    RequestUpgrade {
        merchant_url: String,
        merchant_type: MerchantType,
        #[serde(default)]
        documents: Vec<DocumentInput>,
    },
    Approve {
        merchant_url: String,
        #[serde(default, deserialize_with = "optional_status")]
        status: Option<MerchantStatus>,
        #[serde(default)]
        is_active: bool,
        #[serde(default)]
        approve_upgrade: bool,
    },
    RejectRegistration {
        merchant_url: String,
        reason: String,
    },
    RejectUpgrade {
        merchant_url: String,
        reason: String,
    },
    SelfUpdate {
        merchant_url: String,
        profile: MerchantProfile,
        #[serde(default)]
        documents: Vec<DocumentInput>,
    },
    PartialSelfUpdate {
        merchant_url: String,
        #[serde(default)]
        phone_number: Option<String>,
        #[serde(default)]
        full_name: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        maps: Option<Maps>,
        #[serde(default)]
        documents: Vec<DocumentInput>,
    },
    Rename {
        merchant_url: String,
        merchant_name: String,
    },
    Delete {
        merchant_url: String,
    },
    ClearRejectedUpgrade {
        merchant_url: String,
    },
    AddEmployee {
        merchant_url: String,
        member_id: String,
        email: String,
    },
    ChangeEmployeeStatus {
        merchant_url: String,
        member_id: String,
        status: EmployeeStatus,
    },
    ReinviteEmployee {
        merchant_url: String,
        member_id: String,
    },
    AddAddress {
        merchant_url: String,
        #[serde(default)]
        label: String,
        address: String,
        #[serde(default)]
        maps: Option<Maps>,
        #[serde(default)]
        primary: bool,
    },
    SetPrimaryAddress {
        merchant_url: String,
        label: String,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Register(_) => "register",
            Command::RequestUpgrade { .. } => "request_upgrade",
            Command::Approve { .. } => "approve",
            Command::RejectRegistration { .. } => "reject_registration",
            Command::RejectUpgrade { .. } => "reject_upgrade",
            Command::SelfUpdate { .. } => "self_update",
            Command::PartialSelfUpdate { .. } => "partial_self_update",
            Command::Rename { .. } => "rename",
            Command::Delete { .. } => "delete",
            Command::ClearRejectedUpgrade { .. } => "clear_rejected_upgrade",
            Command::AddEmployee { .. } => "add_employee",
            Command::ChangeEmployeeStatus { .. } => "change_employee_status",
            Command::ReinviteEmployee { .. } => "reinvite_employee",
            Command::AddAddress { .. } => "add_address",
            Command::SetPrimaryAddress { .. } => "set_primary_address",
        }
    }
}

/// Reads commands from a JSON-lines source.
///
/// Blank lines and lines starting with `#` are skipped. A malformed line
/// yields an error for that line only; reading continues with the next one.
pub struct CommandReader<R: BufRead> {
    source: R,
}

impl<R: BufRead> CommandReader<R> {
    pub fn new(source: R) -> Self {
        Self { source }
    }

    /// Lazily parses commands, tagging parse errors with their line number.
    pub fn commands(self) -> impl Iterator<Item = Result<Command>> {
        self.source
            .lines()
            .enumerate()
            .filter_map(|(index, line)| match line {
                Err(e) => Some(Err(MerchantError::from(e))),
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        return None;
                    }
                    Some(serde_json::from_str(line).map_err(|e| {
                        MerchantError::validation(format!("line {}: {e}", index + 1))
                    }))
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_valid_stream() {
        let data = r#"
# onboarding
{"op": "register", "member_id": "u1", "merchant_name": "Toko", "merchant_url": "toko", "merchant_email": "toko@example.com", "full_name": "Budi", "status": "", "is_active": true}
{"op": "request_upgrade", "merchant_url": "toko", "merchant_type": "MANAGE", "documents": [{"document_type": "NPWP", "document_value": "docs/npwp.png"}]}
"#;
        let commands: Vec<Result<Command>> = CommandReader::new(data.as_bytes()).commands().collect();

        assert_eq!(commands.len(), 2);
        match commands[0].as_ref().unwrap() {
            Command::Register(input) => {
                assert_eq!(input.merchant_url, "toko");
                assert_eq!(input.status, None);
                assert!(input.is_active);
            }
            other => panic!("unexpected command {other:?}"),
        }
        match commands[1].as_ref().unwrap() {
            Command::RequestUpgrade {
                merchant_type,
                documents,
                ..
            } => {
                assert_eq!(*merchant_type, MerchantType::Manage);
                assert_eq!(documents.len(), 1);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "{\"op\": \"explode\"}\n{\"op\": \"delete\", \"merchant_url\": \"toko\"}";
        let commands: Vec<Result<Command>> = CommandReader::new(data.as_bytes()).commands().collect();

        assert_eq!(commands.len(), 2);
        let err = commands[0].as_ref().unwrap_err();
        assert!(err.to_string().contains("line 1"));
        assert_eq!(commands[1].as_ref().unwrap().name(), "delete");
    }
}

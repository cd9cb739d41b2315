use crate::domain::merchant::Merchant;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

/// One line of the merchant summary.
#[derive(Debug, Serialize)]
pub struct MerchantRow<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub status: &'a str,
    pub is_active: bool,
    pub upgrade_status: &'a str,
    pub merchant_type: &'a str,
    pub version: u64,
}

impl<'a> From<&'a Merchant> for MerchantRow<'a> {
    fn from(merchant: &'a Merchant) -> Self {
        Self {
            id: &merchant.id,
            name: &merchant.merchant_name,
            status: merchant.status.as_str(),
            is_active: merchant.is_active,
            upgrade_status: merchant.upgrade_status.as_str(),
            merchant_type: merchant.merchant_type.as_str(),
            version: merchant.version,
        }
    }
}

/// Writes merchant summaries as CSV with a header row.
pub struct MerchantWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> MerchantWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_merchants<'a>(&mut self, merchants: impl IntoIterator<Item = &'a Merchant>) -> Result<()> {
        for merchant in merchants {
            self.writer.serialize(MerchantRow::from(merchant))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::merchant::{MerchantStatus, MerchantType, UpgradeStatus};
    use chrono::Utc;

    fn merchant() -> Merchant {
        let now = Utc::now();
        Merchant {
            id: "M20240101000000abcdef".into(),
            member_id: "u1".into(),
            merchant_name: "Toko Budi".into(),
            merchant_url: "toko-budi".into(),
            merchant_email: "toko@example.com".into(),
            phone_number: String::new(),
            full_name: "Budi".into(),
            description: String::new(),
            status: MerchantStatus::Active,
            is_active: true,
            upgrade_status: UpgradeStatus::PendingManage,
            merchant_type: MerchantType::Regular,
            reason: String::new(),
            count_update_name_available: 1,
            version: 2,
            maps: None,
            created_at: now,
            created_by: "u1".into(),
            created_ip: "127.0.0.1".into(),
            updated_at: now,
            updated_by: "u1".into(),
            updated_ip: "127.0.0.1".into(),
        }
    }

    #[test]
    fn test_writer_outputs_header_and_rows() {
        let mut out = Vec::new();
        {
            let mut writer = MerchantWriter::new(&mut out);
            writer.write_merchants(&[merchant()]).unwrap();
        }
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("id,name,status,is_active,upgrade_status,merchant_type,version")
        );
        assert_eq!(
            lines.next(),
            Some("M20240101000000abcdef,Toko Budi,ACTIVE,true,PENDING_MANAGE,REGULAR,2")
        );
    }

    #[test]
    fn test_empty_upgrade_status_is_blank_field() {
        let mut m = merchant();
        m.upgrade_status = UpgradeStatus::None;
        let mut out = Vec::new();
        MerchantWriter::new(&mut out).write_merchants([&m]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.lines().nth(1).unwrap().contains("true,,REGULAR"));
    }
}

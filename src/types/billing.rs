//! Billing data types

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Fixed extra charge applied to every bill of an upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraCharge {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rate: Decimal,
}

/// Request for litebill.billing.upload
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingUploadRequest {
    pub csv_content: String,
    /// Billing month, `YYYY-MM`
    pub bill_month: String,
    pub tariff: Decimal,
    pub vat_percent: Decimal,
    #[serde(default)]
    pub extra_charges: Vec<ExtraCharge>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingUploadSummary {
    pub updated: u32,
    pub inserted: u32,
}

/// Computed bill fields, keyed by `(upload_month, device_serialno)` within a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BillFields {
    pub upload_month: String,
    pub device_serialno: String,
    pub customer_name: String,
    pub final_reading_timestamp: NaiveDateTime,
    #[serde(default)]
    pub final_reading_volume_m3: Option<Decimal>,
    #[serde(default)]
    pub customer_hash: String,
    #[serde(default)]
    pub building_hash: String,
    #[serde(default)]
    pub apartment_hash: String,
    pub bill_start_date: NaiveDate,
    #[serde(default)]
    pub bill_end_date: Option<NaiveDate>,
    pub net_consumption_m3: Decimal,
    #[serde(default)]
    pub invoice_date_csv: Option<NaiveDate>,
    pub upload_tariff_sar: Decimal,
    pub vat_percent: Decimal,
    pub total_bill_amount_sar: Decimal,
    #[serde(default)]
    pub csv_charge_1_desc: Option<String>,
    #[serde(default)]
    pub csv_charge_1_rate: Decimal,
    #[serde(default)]
    pub csv_charge_2_desc: Option<String>,
    #[serde(default)]
    pub csv_charge_2_rate: Decimal,
    #[serde(default)]
    pub csv_charge_3_desc: Option<String>,
    #[serde(default)]
    pub csv_charge_3_rate: Decimal,
}

impl BillFields {
    /// Charges stored on the bill, skipping empty slots
    pub fn extra_charges(&self) -> Vec<ExtraCharge> {
        [
            (&self.csv_charge_1_desc, self.csv_charge_1_rate),
            (&self.csv_charge_2_desc, self.csv_charge_2_rate),
            (&self.csv_charge_3_desc, self.csv_charge_3_rate),
        ]
        .into_iter()
        .filter(|(_, rate)| *rate > Decimal::ZERO)
        .map(|(desc, rate)| ExtraCharge {
            description: desc.clone().unwrap_or_default(),
            rate,
        })
        .collect()
    }

    /// Store charges into the three fixed slots
    pub fn set_extra_charges(&mut self, charges: &[ExtraCharge]) {
        let slot = |i: usize| charges.get(i).map(|c| (Some(c.description.clone()), c.rate));
        (self.csv_charge_1_desc, self.csv_charge_1_rate) = slot(0).unwrap_or((None, Decimal::ZERO));
        (self.csv_charge_2_desc, self.csv_charge_2_rate) = slot(1).unwrap_or((None, Decimal::ZERO));
        (self.csv_charge_3_desc, self.csv_charge_3_rate) = slot(2).unwrap_or((None, Decimal::ZERO));
    }

    /// `Invoice_<serial>_<month>.pdf`
    pub fn invoice_filename(&self) -> String {
        format!(
            "Invoice_{}_{}.pdf",
            file_component(&self.device_serialno),
            file_component(&self.upload_month)
        )
    }
}

/// Make caller-supplied text safe inside a single file or archive entry name.
/// Path separators, drive colons and control characters become `_`.
pub fn file_component(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Persisted bill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BillRecord {
    #[serde(default)]
    pub id: i64,
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub fields: BillFields,
}

/// Request for litebill.billing.list
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillsForMonthRequest {
    pub month: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillListResponse {
    pub items: Vec<BillRecord>,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableMonthsResponse {
    pub months: Vec<String>,
}


#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_extra_charges_skip_empty_slots() {
        let mut bill = fixtures::bill("M1", "2026-03");
        bill.set_extra_charges(&[
            ExtraCharge { description: "Meter".into(), rate: dec!(10) },
            ExtraCharge { description: "Sewer".into(), rate: dec!(2.5) },
        ]);
        let charges = bill.extra_charges();
        assert_eq!(charges.len(), 2);
        assert_eq!(charges[1].description, "Sewer");
        assert!(bill.csv_charge_3_desc.is_none());
    }

    #[test]
    fn test_invoice_filename() {
        let bill = fixtures::bill("M1", "2026-03");
        assert_eq!(bill.invoice_filename(), "Invoice_M1_2026-03.pdf");
    }

    #[test]
    fn test_invoice_filename_has_no_path_separators() {
        let mut bill = fixtures::bill("../../etc/passwd", "2026-03");
        bill.upload_month = "..\\2026:03".to_string();
        let name = bill.invoice_filename();
        assert_eq!(name, "Invoice_.._.._etc_passwd_.._2026_03.pdf");
        assert!(!name.contains('/') && !name.contains('\\'));
    }

    #[test]
    fn test_file_component_keeps_ordinary_serials() {
        assert_eq!(file_component(" SN-A100.2 "), "SN-A100.2");
        assert_eq!(file_component("a\tb"), "a_b");
    }

    #[test]
    fn test_bill_record_flattens_fields() {
        let record = fixtures::record(7, "M1", "2026-03");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["deviceSerialno"], "M1");

        let back: BillRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
